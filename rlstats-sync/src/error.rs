//! HTTP error type for rlstats-sync

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{ClientError, ReprocessError, SyncError, UploadError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. reprocessing a replay that is still syncing
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transient upstream condition (503); nothing changed, try again later
    #[error("Retry later: {0}")]
    RetryLater(String),

    /// External API answered with an error (502)
    #[error("Upstream failed: {0}")]
    UpstreamFailed(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// rlstats-common error
    #[error("Common error: {0}")]
    Common(#[from] rlstats_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use rlstats_common::Error as CommonError;

        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::RetryLater(msg) => (StatusCode::SERVICE_UNAVAILABLE, "RETRY_LATER", msg),
            ApiError::UpstreamFailed(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILED", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => match err {
                CommonError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
                CommonError::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
                }
                CommonError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                _ if err.is_database_locked() => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "RETRY_LATER",
                    err.to_string(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    err.to_string(),
                ),
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            e if e.is_transient() => ApiError::RetryLater(e.to_string()),
            e @ ClientError::MissingCredential => ApiError::Internal(e.to_string()),
            e => ApiError::UpstreamFailed(e.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound(id) => ApiError::NotFound(format!("Replay {}", id)),
            SyncError::Store(e) => e.into(),
            SyncError::External(e) => e.into(),
        }
    }
}

impl From<ReprocessError> for ApiError {
    fn from(err: ReprocessError) -> Self {
        match err {
            ReprocessError::NotFound(id) => ApiError::NotFound(format!("Replay {}", id)),
            e @ ReprocessError::NotTerminal { .. } => ApiError::Conflict(e.to_string()),
            ReprocessError::Store(e) => e.into(),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::InvalidFile(msg) => ApiError::BadRequest(msg),
            UploadError::External(e) => e.into(),
            UploadError::Store(e) => e.into(),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
