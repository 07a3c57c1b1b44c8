use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use serde::Deserialize;

use mercat_gateway::handle_connection;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::decode_token;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token comes
/// in the query string and is checked before upgrading.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let token = query
        .token
        .ok_or_else(|| ApiError::Unauthorized("missing token".into()))?;
    let claims = decode_token(&state.jwt_secret, &token)
        .ok_or_else(|| ApiError::Unauthorized("invalid or expired token".into()))?;

    let gateway = state.gateway();
    Ok(ws.on_upgrade(move |socket| handle_connection(socket, gateway, claims.sub, claims.name)))
}
