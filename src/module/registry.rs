//! Module registry
//!
//! Maps module ids to registered entries and remembers registration order,
//! which is the iteration order for snapshots, typed lookups and dependency
//! resolution.

use super::{ModuleCell, ModuleDescriptor, ModuleEntry, PersistentModule};
use crate::error::{PersistenceError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Default)]
struct RegistryInner {
    /// Ids in registration order
    order: Vec<String>,
    entries: HashMap<String, ModuleEntry>,
}

/// Registry of modules, shared between clones
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry, replacing any entry with the same id
    ///
    /// A replaced entry keeps its original position in registration order.
    /// Returns the replaced entry, if there was one.
    pub async fn register(
        &self,
        entry: ModuleEntry,
    ) -> Result<Option<ModuleEntry>> {
        let id = entry.id().to_string();
        if id.is_empty() {
            warn!(
                module_type = entry.type_name(),
                "Refusing to register module with empty id"
            );
            return Err(PersistenceError::InvalidModuleId(id));
        }

        let mut inner = self.inner.write().await;
        let previous = inner.entries.insert(id.clone(), entry);
        if previous.is_none() {
            inner.order.push(id.clone());
            debug!(module_id = %id, "Registered module");
        } else {
            debug!(module_id = %id, "Replaced registered module");
        }
        Ok(previous)
    }

    /// Register a module instance and return a typed handle to it
    pub async fn register_module<T: PersistentModule>(
        &self,
        module: T,
    ) -> Result<ModuleCell<T>> {
        let entry = ModuleEntry::new(module);
        let cell = entry
            .downcast::<T>()
            .ok_or_else(|| anyhow::anyhow!("new entry for {} lost its type", entry.type_name()))?;
        self.register(entry).await?;
        Ok(cell)
    }

    /// Replace the entry for an id that is still registered
    ///
    /// Returns `false` (and leaves the registry untouched) when the id was
    /// unregistered in the meantime.
    pub(crate) async fn replace_existing(&self, entry: ModuleEntry) -> bool {
        let mut inner = self.inner.write().await;
        match inner.entries.get_mut(entry.id()) {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => false,
        }
    }

    /// Remove a module; no-op when the id is unknown
    pub async fn unregister(&self, id: &str) -> Option<ModuleEntry> {
        let mut inner = self.inner.write().await;
        let removed = inner.entries.remove(id);
        if removed.is_some() {
            inner.order.retain(|existing| existing != id);
            debug!(module_id = %id, "Unregistered module");
        }
        removed
    }

    /// Entry registered under `id`
    pub async fn get(&self, id: &str) -> Option<ModuleEntry> {
        self.inner.read().await.entries.get(id).cloned()
    }

    /// Whether `id` is registered
    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.entries.contains_key(id)
    }

    /// Typed handle to module `id`, if it is registered and is a `T`
    pub async fn get_as<T: PersistentModule>(&self, id: &str) -> Option<ModuleCell<T>> {
        self.get(id).await.and_then(|entry| entry.downcast::<T>())
    }

    /// First module of type `T` in registration order
    ///
    /// When several modules share a type, which one is returned is
    /// implementation-defined; look them up by id instead.
    pub async fn find<T: PersistentModule>(&self) -> Option<ModuleCell<T>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .find_map(|entry| entry.downcast::<T>())
    }

    /// Point-in-time copy of all entries in registration order
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read().await;
        let entries = inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect();
        RegistrySnapshot { entries }
    }

    /// Number of registered modules
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether no modules are registered
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}

/// Registry contents captured at one point in time
///
/// Later registry mutations are not reflected. Iterate it as often as needed.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Vec<ModuleEntry>,
}

impl RegistrySnapshot {
    /// Entries in registration order
    pub fn iter(&self) -> std::slice::Iter<'_, ModuleEntry> {
        self.entries.iter()
    }

    /// Current ordering metadata of every entry, in registration order
    ///
    /// Reads each module under its read lock.
    pub async fn descriptors(&self) -> Vec<ModuleDescriptor> {
        let mut descriptors = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            descriptors.push(entry.current_descriptor().await);
        }
        descriptors
    }

    /// Entry with the given id
    pub fn get(&self, id: &str) -> Option<&ModuleEntry> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    /// Ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id().to_string()).collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a RegistrySnapshot {
    type Item = &'a ModuleEntry;
    type IntoIter = std::slice::Iter<'a, ModuleEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for RegistrySnapshot {
    type Item = ModuleEntry;
    type IntoIter = std::vec::IntoIter<ModuleEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
