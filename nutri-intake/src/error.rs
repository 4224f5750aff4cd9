//! Error types for nutri-intake
//!
//! Service errors are mapped onto HTTP statuses here so handlers can use `?`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{IntakeError, ReconcileError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict with the current row state (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Well-formed request whose content cannot be staged (422)
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    /// Upload over the configured size (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// nutri-common error
    #[error("Common error: {0}")]
    Common(#[from] nutri_common::Error),
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::NotFound(_) | ReconcileError::BatchNotFound(_) => ApiError::NotFound(err.to_string()),
            ReconcileError::AlreadyIgnored(_)
            | ReconcileError::NotPending { .. }
            | ReconcileError::InvalidTransition { .. }
            | ReconcileError::Busy(_) => ApiError::Conflict(err.to_string()),
            ReconcileError::InvalidInput(msg) => ApiError::BadRequest(msg),
            ReconcileError::Database(e) => ApiError::Common(e),
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::InvalidInput(msg) => ApiError::BadRequest(msg),
            IntakeError::TooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            IntakeError::Sheet(_) | IntakeError::NoRows => ApiError::Unprocessable(err.to_string()),
            IntakeError::Internal(e) => ApiError::Common(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE", msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, error_message = %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
