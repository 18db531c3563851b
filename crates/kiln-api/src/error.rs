//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kiln_scheduler::TriggerError;
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<kiln_core::Error> for ApiError {
    fn from(err: kiln_core::Error) -> Self {
        match err {
            kiln_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            kiln_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            kiln_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<kiln_db::DbError> for ApiError {
    fn from(err: kiln_db::DbError) -> Self {
        match err {
            kiln_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            kiln_db::DbError::Duplicate(msg) => ApiError::Conflict(msg),
            _ => ApiError::Unavailable(err.to_string()),
        }
    }
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::Store(e) => e.into(),
            TriggerError::Queue { .. } => ApiError::Unavailable(err.to_string()),
        }
    }
}
