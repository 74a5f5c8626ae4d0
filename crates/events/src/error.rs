//! Event publishing error types.

use thiserror::Error;

/// Error raised while building or publishing a domain event.
#[derive(Debug, Error)]
pub enum EventError {
    /// Payload could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Broker rejected or never acknowledged the publish.
    #[error("publish error: {0}")]
    Publish(#[from] anyhow::Error),
}

/// Result type for event operations.
pub type Result<T> = std::result::Result<T, EventError>;
