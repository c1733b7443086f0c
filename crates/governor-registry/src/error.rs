//! Error types for governor-registry

/// Result type for governor-registry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in registry model and store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed entry id
    #[error("Invalid entry id '{raw}': {reason}")]
    InvalidId { raw: String, reason: String },

    /// Entry lookup failed
    #[error("Entry not found: {id}")]
    EntryNotFound { id: String },

    /// Create collided with an existing entry
    #[error("Entry already exists: {id}")]
    EntryExists { id: String },

    /// Version lookup failed
    #[error("Version not found: {id}")]
    VersionNotFound { id: String },

    /// Store-level failure reported by the backing registry
    #[error("Store error: {message}")]
    Store { message: String },

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_id(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}
