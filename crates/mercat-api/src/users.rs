use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use mercat_types::api::Claims;
use mercat_types::models::{User, UserProfile};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_db;

/// Loads a user with their rating. `owner` keeps the email in the response.
async fn load_profile(state: &AppState, user_id: Uuid, owner: bool) -> Result<UserProfile, ApiError> {
    let id = user_id.to_string();
    let (row, (average, review_count)) = run_db(state, move |db| {
        let row = db.get_user_by_id(&id)?;
        let summary = db.get_rating_summary(&id)?;
        Ok((row, summary))
    })
    .await?;

    let mut user = User::try_from(row.ok_or_else(|| ApiError::NotFound(format!("user {} not found", user_id)))?)?;
    if !owner {
        user.email = None;
    }

    Ok(UserProfile {
        user,
        rating: average.map(|avg| (avg * 10.0).round() / 10.0).unwrap_or(0.0),
        review_count,
    })
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_profile(&state, claims.sub, true).await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_profile(&state, user_id, false).await?))
}
