use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use mercat_safety::{GuardError, StoreError};

/// Stable error code constants.
///
/// Clients match on `code` from `{"code": "NOT_FOUND", "message": "..."}`.
/// Codes never change; messages may be reworded.
pub mod error_code {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP 404.
    #[error("{0}")]
    NotFound(String),

    /// HTTP 409.
    #[error("{0}")]
    Conflict(String),

    /// HTTP 400.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid credentials. HTTP 401.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not allowed. HTTP 403.
    #[error("{0}")]
    PermissionDenied(String),

    /// The message store did not answer in time. HTTP 503.
    #[error("{0}")]
    Unavailable(String),

    /// HTTP 500.
    #[error("{0}")]
    Storage(String),

    /// HTTP 500.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => error_code::NOT_FOUND,
            ApiError::Conflict(_) => error_code::ALREADY_EXISTS,
            ApiError::Validation(_) => error_code::VALIDATION_FAILED,
            ApiError::Unauthorized(_) => error_code::UNAUTHENTICATED,
            ApiError::PermissionDenied(_) => error_code::PERMISSION_DENIED,
            ApiError::Unavailable(_) => error_code::STORE_UNAVAILABLE,
            ApiError::Storage(_) => error_code::STORAGE_ERROR,
            ApiError::Internal(_) => error_code::INTERNAL,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "code": self.error_code(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

/// Database failures. The detail goes to the log, not to the client.
impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("database error: {:#}", e);
        ApiError::Storage("storage error".into())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ThreadNotFound(id) => ApiError::NotFound(format!("thread {} not found", id)),
            StoreError::Timeout(_) => ApiError::Unavailable(e.to_string()),
            StoreError::Backend(detail) => {
                error!("message store error: {}", detail);
                ApiError::Storage("storage error".into())
            }
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::Unauthenticated => ApiError::Unauthorized(e.to_string()),
            GuardError::TooLong { .. } => ApiError::Validation(e.to_string()),
            GuardError::Persistence(store) => store.into(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal("internal error".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn status_code_mapping() {
        assert_eq!(ApiError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::PermissionDenied("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Unavailable("x".into()).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::Storage("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_errors_keep_their_meaning() {
        let missing = ApiError::from(StoreError::ThreadNotFound(Uuid::nil()));
        assert_eq!(missing.error_code(), "NOT_FOUND");

        let slow = ApiError::from(GuardError::Persistence(StoreError::Timeout(Duration::from_secs(10))));
        assert_eq!(slow.error_code(), "STORE_UNAVAILABLE");

        let broken = ApiError::from(StoreError::Backend("disk I/O error".into()));
        assert_eq!(broken.error_code(), "STORAGE_ERROR");
        assert_eq!(broken.to_string(), "storage error");

        assert_eq!(ApiError::from(GuardError::Unauthenticated).error_code(), "UNAUTHENTICATED");
        assert_eq!(ApiError::from(GuardError::TooLong { max: 2000 }).error_code(), "VALIDATION_FAILED");
    }

    #[test]
    fn database_errors_hide_details() {
        let err = ApiError::from(anyhow::anyhow!("UNIQUE constraint failed: users.email"));
        assert_eq!(err.error_code(), "STORAGE_ERROR");
        assert_eq!(err.to_string(), "storage error");
    }
}
