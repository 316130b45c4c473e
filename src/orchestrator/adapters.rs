//! Adapters between the orchestrator and its collaborators
//!
//! These attach the module id and operation to collaborator failures and turn
//! them into `PersistenceError`s. No ordering or retry logic lives here.

use crate::error::{PersistenceError, Result, StorageOperation};
use crate::module::ModuleEntry;
use crate::serializer::Serializer;
use crate::storage::StorageBackend;
use std::sync::Arc;

/// Encodes and decodes registered modules through a `Serializer`
#[derive(Clone)]
pub(crate) struct SerializerAdapter {
    serializer: Arc<dyn Serializer>,
}

impl SerializerAdapter {
    pub(crate) fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self { serializer }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.serializer.name()
    }

    /// Run the module's pre-save hook and produce its payload
    pub(crate) async fn encode(&self, entry: &ModuleEntry) -> Result<Vec<u8>> {
        let document = entry
            .snapshot_document()
            .await
            .map_err(|source| PersistenceError::Serialization {
                module_id: entry.id().to_string(),
                source,
            })?;
        self.serializer
            .serialize(&document)
            .map_err(|source| PersistenceError::Serialization {
                module_id: entry.id().to_string(),
                source,
            })
    }

    /// Decode `payload` as a new instance of `registered`'s concrete type
    pub(crate) fn decode(
        &self,
        registered: &ModuleEntry,
        payload: &[u8],
    ) -> Result<ModuleEntry> {
        let to_error = |source| PersistenceError::Serialization {
            module_id: registered.id().to_string(),
            source,
        };
        let document = self.serializer.deserialize(payload).map_err(to_error)?;
        registered.decode(document).map_err(to_error)
    }
}

/// Storage access keyed by module id
#[derive(Clone)]
pub(crate) struct StorageAdapter {
    backend: Arc<dyn StorageBackend>,
}

impl StorageAdapter {
    pub(crate) fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.backend.name()
    }

    pub(crate) async fn exists(&self, module_id: &str) -> Result<bool> {
        self.backend
            .exists(module_id)
            .await
            .map_err(|source| storage_error(module_id, StorageOperation::Exists, source))
    }

    pub(crate) async fn read(&self, module_id: &str) -> Result<Option<Vec<u8>>> {
        self.backend
            .read(module_id)
            .await
            .map_err(|source| storage_error(module_id, StorageOperation::Read, source))
    }

    pub(crate) async fn write(&self, module_id: &str, payload: &[u8]) -> Result<()> {
        self.backend
            .write(module_id, payload)
            .await
            .map_err(|source| storage_error(module_id, StorageOperation::Write, source))
    }

    pub(crate) async fn delete(&self, module_id: &str) -> Result<bool> {
        self.backend
            .delete(module_id)
            .await
            .map_err(|source| storage_error(module_id, StorageOperation::Delete, source))
    }
}

fn storage_error(
    module_id: &str,
    operation: StorageOperation,
    source: crate::storage::StorageError,
) -> PersistenceError {
    PersistenceError::Storage {
        module_id: module_id.to_string(),
        operation,
        source,
    }
}
