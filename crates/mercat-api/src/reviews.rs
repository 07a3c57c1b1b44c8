use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use mercat_db::format_ts;
use mercat_types::api::{Claims, CreateReviewRequest};
use mercat_types::models::Review;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_db;

const MAX_COMMENT_CHARS: usize = 1000;

/// Reviews a user received, newest first.
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let id = user_id.to_string();
    let reviews = run_db(&state, move |db| {
        if db.get_user_by_id(&id)?.is_none() {
            return Ok(None);
        }
        let reviews = db
            .get_reviews_for_user(&id)?
            .into_iter()
            .map(Review::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Some(reviews))
    })
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("user {} not found", user_id)))?;
    Ok(Json(reviews))
}

pub async fn create_review(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !(1..=5).contains(&req.rating) {
        return Err(ApiError::Validation("rating must be between 1 and 5".into()));
    }
    if target_id == claims.sub {
        return Err(ApiError::Validation("you cannot review yourself".into()));
    }
    let comment = req.comment.trim().to_string();
    if comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(ApiError::Validation(format!("comment must be at most {} characters", MAX_COMMENT_CHARS)));
    }

    let review_id = Uuid::new_v4();
    let id = review_id.to_string();
    let reviewer_id = claims.sub.to_string();
    let target = target_id.to_string();
    let listing_id = req.listing_id.map(|l| l.to_string());
    let rating = req.rating;
    let now = format_ts(chrono::Utc::now());

    let stored = run_db(&state, move |db| {
        if db.get_user_by_id(&target)?.is_none() {
            return Ok(Err(ApiError::NotFound(format!("user {} not found", target))));
        }
        if let Some(listing_id) = &listing_id {
            if db.get_listing(listing_id)?.is_none() {
                return Ok(Err(ApiError::NotFound(format!("listing {} not found", listing_id))));
            }
        }
        db.insert_review(&id, &reviewer_id, &target, listing_id.as_deref(), rating, &comment, &now)?;
        let review = db
            .get_reviews_for_user(&target)?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow::anyhow!("review {} vanished after insert", id))?;
        Ok(Ok(Review::try_from(review)?))
    })
    .await??;

    info!("user {} reviewed {} ({} stars)", claims.sub, target_id, rating);
    Ok((StatusCode::CREATED, Json(stored)))
}
