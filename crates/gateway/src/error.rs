//! Gateway error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors from connection registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Operation referenced a connection id no longer registered.
    /// Always a race with disconnection, never a hard failure: callers
    /// treat the target as already gone.
    #[error("connection not found: {0}")]
    ConnectionNotFound(uuid::Uuid),

    /// `send_to_user` found no live connections for the user. The caller
    /// may persist the message for later delivery; that is outside this
    /// subsystem.
    #[error("user has no live connections: {0}")]
    UserNotConnected(String),
}

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Bad, missing, or expired credential at handshake time.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Transport-level failure to establish the persistent channel.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Broker payload failed to decode.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// External capability (auth validation, membership listing) failed.
    #[error("directory error: {0}")]
    Directory(#[from] crate::directory::DirectoryError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// NATS consumer stream error.
    #[error("broker error: {0}")]
    Broker(#[from] anyhow::Error),

    /// Write to a specific socket failed (buffer full or closed).
    #[error("channel send error")]
    ChannelSend,
}

impl From<tokio::sync::mpsc::error::TrySendError<axum::extract::ws::Message>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::TrySendError<axum::extract::ws::Message>) -> Self {
        GatewayError::ChannelSend
    }
}

/// Handshake-time errors surface to the HTTP layer as status codes;
/// everything after the upgrade stays on the socket.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Directory(crate::directory::DirectoryError::Unauthenticated) => {
                StatusCode::UNAUTHORIZED
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
