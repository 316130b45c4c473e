//! Storage-specific error types

use thiserror::Error;

/// Errors that can occur in a storage backend
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite query or connection failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Key cannot be mapped to a storage entry (traversal, control characters, empty)
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}
