// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Errors raised by the partitioned store and the Command API.
///
/// Missing keys and duplicate keys are not errors: they surface as `false` /
/// `None`. Only programmer errors (bad input shapes) reach the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<validator::ValidationErrors> for StoreError {
    fn from(err: validator::ValidationErrors) -> Self {
        StoreError::MalformedInput(err.to_string())
    }
}

/// Failures of the synchronous local cache.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("local storage unavailable: {0}")]
    Unavailable(String),

    #[error("local storage quota exceeded ({needed} bytes needed, {limit} allowed)")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("local storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures talking to the remote document endpoint.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote answered with status {0}")]
    Status(u16),

    #[error("remote rejected the push: {0}")]
    Rejected(String),

    #[error("invalid remote url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("remote payload could not be decoded: {0}")]
    Decode(String),
}

/// Failures building a `DataManager` from configuration.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// HTTP error of the question-bank document server.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    // 500 Internal Server Error
    #[error("internal server error: {0}")]
    InternalServerError(String),

    // 400 Bad Request
    #[error("bad request: {0}")]
    BadRequest(String),

    // 409 Conflict (e.g., duplicate QCODE)
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Converts the error into a JSON response with appropriate HTTP status code.
/// The body keeps the `{ success: false, error }` shape the question tools expect.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };
        let body = Json(json!({
            "success": false,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
