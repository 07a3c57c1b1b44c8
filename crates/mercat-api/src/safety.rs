use axum::{Json, extract::State};

use mercat_types::api::ScanRequest;
use mercat_types::models::RiskSignal;

use crate::auth::AppState;

/// Both scans of a piece of text, so clients can render the live banner the
/// same way the server does.
pub async fn scan(State(state): State<AppState>, Json(req): Json<ScanRequest>) -> Json<RiskSignal> {
    Json(state.guard.scanner().scan(&req.text))
}
