//! Error types for the VisionRTC server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use visionrtc_webrtc::WebRtcError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Signaling core error
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] WebRtcError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_code) = match self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ServerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ServerError::WebRtc(ref e) => (StatusCode::INTERNAL_SERVER_ERROR, e.kind().as_str()),
            ServerError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            ServerError::Bind { .. } | ServerError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "io_error")
            }
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            tracing::error!(error_code, "{}", self);
        }

        let body = Json(json!({
            "error": error_code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_status() {
        let response = ServerError::NotFound("session".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_webrtc_error_status() {
        let err: ServerError = WebRtcError::Internal("boom".to_string()).into();
        assert!(err.to_string().contains("boom"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
