//! Storage backends
//!
//! The orchestrator treats storage as a blob store keyed by module id. Key to
//! path/row mapping is the backend's concern.

pub mod error;
pub mod file;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

pub use error::StorageError;
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Durable key-value blob store
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in log output
    fn name(&self) -> &'static str;

    /// Whether a payload is stored under `key`
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Payload stored under `key`, or `None` when there is none
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `payload` under `key`, replacing any previous payload
    async fn write(&self, key: &str, payload: &[u8]) -> Result<(), StorageError>;

    /// Remove the payload under `key`; `false` when nothing was stored
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// Reject keys that cannot safely name a file or row
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.trim().is_empty() {
        return Err(StorageError::InvalidKey("key cannot be empty".to_string()));
    }

    if key.contains("..") || key.contains('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(format!(
            "'{}': path traversal or separator detected",
            key
        )));
    }

    if key.chars().any(|c| c.is_control()) {
        return Err(StorageError::InvalidKey(format!(
            "'{}': control characters detected",
            key.escape_debug()
        )));
    }

    Ok(())
}
