use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use mercat_safety::{MessageStore, SendOutcome};
use mercat_types::api::{Claims, SendMessageRequest, SendMessageResponse};
use mercat_types::models::Thread;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_db;

/// Loads the thread and checks that `user_id` is its buyer or seller.
async fn participant_thread(state: &AppState, thread_id: Uuid, user_id: Uuid) -> Result<Thread, ApiError> {
    let id = thread_id.to_string();
    let row = run_db(state, move |db| db.get_thread(&id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("thread {} not found", thread_id)))?;
    let thread = Thread::try_from(row)?;
    if !thread.is_participant(user_id) {
        return Err(ApiError::PermissionDenied("not a participant of this thread".into()));
    }
    Ok(thread)
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    participant_thread(&state, thread_id, claims.sub).await?;
    Ok(Json(state.store.list(thread_id).await?))
}

/// `201` with the stored message (and the system warning, if flagged),
/// `204` when the content is blank, or `400` when it is too long.
pub async fn send_message(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    participant_thread(&state, thread_id, claims.sub).await?;

    match state.guard.send_text(thread_id, &req.content, Some(claims.sub)).await? {
        SendOutcome::Ignored => Ok(StatusCode::NO_CONTENT.into_response()),
        SendOutcome::Sent { message, warning } => {
            state
                .dispatcher
                .publish_messages(std::iter::once(message.clone()).chain(warning.clone()));
            Ok((StatusCode::CREATED, Json(SendMessageResponse { message, warning })).into_response())
        }
    }
}
