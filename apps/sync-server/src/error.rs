//! Error types for the sync server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_core::{Classify, CoreError};
use beacon_db::DbError;
use beacon_sync::{ApiError, SyncError};
use serde_json::json;
use tracing::error;

/// HTTP-facing errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Authorization failed: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream API error: {0}")]
    Upstream(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SyncError> for ServerError {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        match err {
            SyncError::RunNotFound(_) => ServerError::NotFound(message),
            SyncError::NotResumable { .. } | SyncError::RunActive(_) => {
                ServerError::Conflict(message)
            }
            SyncError::Core(CoreError::InvalidTransition { .. }) => ServerError::Conflict(message),
            SyncError::Core(_) => ServerError::InvalidRequest(message),
            SyncError::Database(DbError::NotFound { .. }) => ServerError::NotFound(message),
            SyncError::Api(ApiError::Status { status: 401, .. }) => {
                ServerError::Unauthorized(message)
            }
            SyncError::Api(ApiError::Status { status: 403, .. }) => ServerError::Forbidden(message),
            SyncError::Api(_) => ServerError::Upstream(message),
            SyncError::Cancelled => ServerError::Unavailable(message),
            ref other => {
                error!(code = other.classification().code, error = %other, "Unhandled sync error");
                ServerError::Internal(message)
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}
