//! Error types for governor-sync

use std::path::PathBuf;

/// Result type for governor-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in filesystem synchronization
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure at a specific path
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Advisory lock could not be acquired
    #[error("Lock acquisition failed for {path}")]
    LockFailed { path: PathBuf },

    /// Index file could not be parsed
    #[error("Failed to parse index at {path}: {message}")]
    IndexParse { path: PathBuf, message: String },

    /// Index entry is structurally invalid
    #[error("Invalid index entry in {namespace}: {message}")]
    InvalidIndexEntry { namespace: String, message: String },

    /// Referenced side file is missing or unreadable
    #[error("Source file {file} referenced from {namespace} could not be read: {message}")]
    SourceFile {
        namespace: String,
        file: String,
        message: String,
    },

    /// Materialization policy file could not be parsed
    #[error("Failed to parse sync policy: {message}")]
    PolicyParse { message: String },

    /// Registry model or store error
    #[error(transparent)]
    Registry(#[from] governor_registry::Error),

    /// YAML serialization error
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
