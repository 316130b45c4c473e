//! Error types for the persistence orchestrator
//!
//! `PersistenceError` is what callers of the orchestrator see. Storage and
//! codec layers keep their own error enums and are wrapped here together with
//! the module id and the operation that failed.

use crate::module::ModuleId;
use crate::serializer::SerializerError;
use crate::storage::StorageError;
use thiserror::Error;

/// Storage operation that produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    /// Existence check
    Exists,
    /// Payload read
    Read,
    /// Payload write
    Write,
    /// Payload deletion
    Delete,
}

impl std::fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageOperation::Exists => write!(f, "exists"),
            StorageOperation::Read => write!(f, "read"),
            StorageOperation::Write => write!(f, "write"),
            StorageOperation::Delete => write!(f, "delete"),
        }
    }
}

/// Orchestrator-level error types
///
/// A missing stored payload is not represented here: it is the normal
/// `LoadOutcome::NotFound` outcome. Dependency cycles are reported as
/// warnings in `LoadOrder::cycles` and never fail a resolution.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// A required collaborator (usually the serializer) is not configured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The operation referenced a module id that is not registered
    #[error("Module not registered: {0}")]
    NotRegistered(ModuleId),

    /// The module id is empty or otherwise unusable as a storage key
    #[error("Invalid module id: {0:?}")]
    InvalidModuleId(String),

    /// Encoding or decoding a module's state failed
    #[error("Serialization failed for module '{module_id}': {source}")]
    Serialization {
        /// Module whose state could not be (de)serialized
        module_id: ModuleId,
        /// Underlying codec failure
        #[source]
        source: SerializerError,
    },

    /// The storage backend failed
    #[error("Storage {operation} failed for module '{module_id}': {source}")]
    Storage {
        /// Module whose payload was being accessed
        module_id: ModuleId,
        /// Operation that failed
        operation: StorageOperation,
        /// Underlying storage failure
        #[source]
        source: StorageError,
    },

    /// The spawned flush task panicked or was aborted
    #[error("Flush task failed: {0}")]
    FlushTask(String),

    /// Internal error (catch-all for unexpected errors)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PersistenceError {
    /// Module id the error refers to, if any
    pub fn module_id(&self) -> Option<&str> {
        match self {
            PersistenceError::NotRegistered(id) => Some(id),
            PersistenceError::Serialization { module_id, .. }
            | PersistenceError::Storage { module_id, .. } => Some(module_id),
            _ => None,
        }
    }

    /// Missing serializer, reported by operations that need one
    pub(crate) fn missing_serializer(operation: &str) -> Self {
        PersistenceError::Configuration(format!(
            "no serializer configured; call set_serializer before {}",
            operation
        ))
    }
}

/// Convenience alias used throughout the crate
pub type Result<T, E = PersistenceError> = std::result::Result<T, E>;
