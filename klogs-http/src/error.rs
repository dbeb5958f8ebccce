use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use klogs_core::ErrorMessage;

use crate::session::ManagerError;

/// HTTP-level error: a status code plus the same `{"error": {...}}` body the
/// WebSocket protocol uses
#[derive(Debug)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub body: ErrorMessage,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: String, error_type: &str) -> Self {
        Self {
            status,
            body: ErrorMessage::new(message, error_type.to_string(), None),
        }
    }

    pub fn not_found(message: String) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, "not_found")
    }

    pub fn too_many_sessions(message: String) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "too_many_sessions")
    }

    pub fn shutting_down(message: String) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "shutting_down")
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<ManagerError> for ErrorResponse {
    fn from(error: ManagerError) -> Self {
        match error {
            ManagerError::TooManySessions(_) => ErrorResponse::too_many_sessions(error.to_string()),
            ManagerError::ShuttingDown => ErrorResponse::shutting_down(error.to_string()),
        }
    }
}
