// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Relay errors surfaced over HTTP
impl From<huddle_sfu::Error> for AppError {
    fn from(err: huddle_sfu::Error) -> Self {
        use huddle_sfu::Error;

        match err {
            Error::RoomFull { .. } | Error::RoomLimitReached => {
                Self::service_unavailable(err.to_string())
            }
            Error::AlreadyJoined | Error::DuplicateParticipant(_) | Error::NotJoined => {
                Self::bad_request(err.to_string())
            }
            Error::Session(_) | Error::Relay(_) | Error::Transport(_) | Error::Codec(_) => {
                tracing::error!(error = %err, "Relay error");
                Self::internal_server_error("Internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = AppError::bad_request("Missing room query parameter");
        assert_eq!(err.to_string(), "400 Bad Request: Missing room query parameter");
    }

    #[test]
    fn test_into_response_status() {
        let response = AppError::bad_request("nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_from_relay_error() {
        let err = AppError::from(huddle_sfu::Error::RoomLimitReached);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

        let err = AppError::from(huddle_sfu::Error::Transport("socket reset".to_string()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Internal server error");

        let err = AppError::from(huddle_sfu::Error::DuplicateParticipant("alice".to_string()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Participant alice is already in the room");
    }
}
