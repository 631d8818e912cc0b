//! Storage error types.

use thiserror::Error;

/// Errors that can occur in log store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (creating the directory, opening or writing a partition).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
