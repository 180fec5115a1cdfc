//! Error handling for the RanchCast controller

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed system configuration
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Could not bind a listening socket
    #[error("Bind failed: {0}")]
    BindFailed(String),

    /// Could not reach a remote endpoint, or the link is down
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Malformed JSON or wrong envelope shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// PTZ head did not acknowledge a stop command
    #[error("PTZ stop failed: {0}")]
    PtzStopFailed(String),

    /// No free slot in the port pool (too many peers)
    #[error("Too many peers: {0}")]
    PortExhausted(String),

    /// Peer id already present
    #[error("Peer already exists: {0}")]
    PeerDuplicate(String),

    /// Peer id not found
    #[error("Peer not found: {0}")]
    PeerUnknown(String),

    /// fork/exec of a child process failed
    #[error("Child spawn failed: {0}")]
    ChildSpawnFailed(String),

    /// A timed operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) | Error::Protocol(_) => StatusCode::BAD_REQUEST,
            Error::PeerUnknown(_) => StatusCode::NOT_FOUND,
            Error::PeerDuplicate(_) => StatusCode::CONFLICT,
            Error::PortExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(status = %status, error = %self, "Request error");

        let body = Json(json!({
            "status": "error",
            "message": self.to_string()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PortExhausted("max_peers=4".to_string());
        assert_eq!(err.to_string(), "Too many peers: max_peers=4");

        let err = Error::PtzStopFailed("no acknowledgement".to_string());
        assert_eq!(err.to_string(), "PTZ stop failed: no acknowledgement");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
