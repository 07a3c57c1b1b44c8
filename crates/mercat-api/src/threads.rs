use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use mercat_db::format_ts;
use mercat_safety::ThreadDirectory;
use mercat_types::api::{Claims, OpenThreadRequest};
use mercat_types::models::Thread;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::listings::load_listing;
use crate::run_db;

/// Returns the thread between the caller and the listing's seller, creating it
/// on first contact.
pub async fn open_thread(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenThreadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = load_listing(&state, req.listing_id).await?;
    if listing.seller_id == claims.sub {
        return Err(ApiError::PermissionDenied("you cannot open a chat on your own listing".into()));
    }

    let thread_id = Uuid::new_v4().to_string();
    let listing_id = listing.id.to_string();
    let buyer_id = claims.sub.to_string();
    let seller_id = listing.seller_id.to_string();
    let now = format_ts(chrono::Utc::now());
    let row = run_db(&state, move |db| {
        db.get_or_create_thread(&thread_id, &listing_id, &buyer_id, &seller_id, &now)
    })
    .await?;

    let thread = Thread::try_from(row)?;
    info!("user {} opened thread {} on listing {}", claims.sub, thread.id, listing.id);
    Ok(Json(thread))
}

pub async fn list_threads(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_threads_for_user(claims.sub).await?))
}
