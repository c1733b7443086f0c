//! Error types for governor-core

use crate::protocol::Detail;

/// Result type for governor-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in governance operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The permission checker rejected the call before it was sent
    #[error("Permission denied: {permission} for user '{user}'")]
    PermissionDenied { user: String, permission: String },

    /// The reply deadline elapsed; the worker is not cancelled
    #[error("Timed out after {seconds}s waiting for a reply")]
    Timeout { seconds: u64 },

    /// A reply arrived carrying a different request id
    #[error("Received response for a different request (expected {expected}, got {got})")]
    Correlation { expected: String, got: String },

    /// The reply channel closed before a response arrived
    #[error("Reply channel closed before a response arrived")]
    ReplyDropped,

    /// A named bus channel no longer exists
    #[error("Channel '{channel}' is closed")]
    ChannelClosed { channel: String },

    /// The coordinator rejected or failed the operation
    #[error("{message}")]
    Rejected { message: String, details: Vec<Detail> },

    /// The coordinator could not start a worker
    #[error("Failed to spawn worker: {message}")]
    Spawn { message: String },

    /// Registry model or store error
    #[error(transparent)]
    Registry(#[from] governor_registry::Error),

    /// Filesystem synchronization error
    #[error(transparent)]
    Sync(#[from] governor_sync::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn rejected(message: impl Into<String>, details: Vec<Detail>) -> Self {
        Self::Rejected {
            message: message.into(),
            details,
        }
    }

    pub fn spawn(message: impl Into<String>) -> Self {
        Self::Spawn {
            message: message.into(),
        }
    }
}
