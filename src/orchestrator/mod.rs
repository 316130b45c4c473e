//! Persistence orchestrator
//!
//! Ties the module registry, the save queue and the load order resolver to a
//! serializer and a storage backend:
//! - `force_flush` drains the save queue on a background task (single-flight)
//! - `load_all` loads every module in dependency + priority order
//! - per-module failures are logged and reported, never propagated out of a batch
//!
//! The orchestrator is an explicitly constructed value. Clones share state, so
//! hand a clone to whatever owns the application's persistence lifecycle.

mod adapters;
pub mod events;
pub mod flush;
pub mod graph;
pub mod load;
pub mod queue;

use crate::config::{Config, StorageKind};
use crate::error::{PersistenceError, Result};
use crate::module::{
    LoadContext, ModuleCell, ModuleEntry, ModuleId, ModuleRegistry, PersistentModule,
    RegistrySnapshot,
};
use crate::serializer::{JsonSerializer, Serializer, SerializerError};
use crate::storage::{FileStorage, MemoryStorage, SqliteStorage, StorageBackend};
use adapters::{SerializerAdapter, StorageAdapter};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub use events::{PersistenceEvent, DEFAULT_EVENT_CAPACITY};
pub use flush::{FlushHandle, FlushReport, ModuleFailure};
pub use graph::{resolve_load_order, DependencyCycle, LoadOrder};
pub use load::{DeleteOutcome, LoadOutcome, LoadReport};
pub use queue::SaveQueue;

struct Inner {
    registry: ModuleRegistry,
    queue: SaveQueue,
    serializer: RwLock<Option<SerializerAdapter>>,
    storage: StorageAdapter,
    /// Single-flight flag for save flushes
    flushing: AtomicBool,
    flush_idle: Notify,
    events: broadcast::Sender<PersistenceEvent>,
}

impl Inner {
    fn emit(&self, event: PersistenceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Clears the flushing flag when the batch ends, even if it panicked
struct FlushGuard {
    inner: Arc<Inner>,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.inner.flushing.store(false, Ordering::SeqCst);
        self.inner.flush_idle.notify_waiters();
    }
}

/// Builder for [`PersistenceOrchestrator`]
pub struct OrchestratorBuilder {
    storage: Arc<dyn StorageBackend>,
    serializer: Option<Arc<dyn Serializer>>,
    event_capacity: usize,
}

impl OrchestratorBuilder {
    /// Serializer used for saves and loads
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Capacity of the notification channel (at least 1)
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Build the orchestrator
    pub fn build(self) -> PersistenceOrchestrator {
        let (events, _) = broadcast::channel(self.event_capacity);
        PersistenceOrchestrator {
            inner: Arc::new(Inner {
                registry: ModuleRegistry::new(),
                queue: SaveQueue::new(),
                serializer: RwLock::new(self.serializer.map(SerializerAdapter::new)),
                storage: StorageAdapter::new(self.storage),
                flushing: AtomicBool::new(false),
                flush_idle: Notify::new(),
                events,
            }),
        }
    }
}

/// Coordinates registration, save flushes and loads
#[derive(Clone)]
pub struct PersistenceOrchestrator {
    inner: Arc<Inner>,
}

impl PersistenceOrchestrator {
    /// Orchestrator over `storage` with no serializer configured yet
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self::builder(storage).build()
    }

    /// Start building an orchestrator over `storage`
    pub fn builder(storage: Arc<dyn StorageBackend>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            storage,
            serializer: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Build storage and serializer from configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let storage: Arc<dyn StorageBackend> = match config.storage.kind {
            StorageKind::File => Arc::new(FileStorage::with_extension(
                &config.storage.data_dir,
                &config.storage.file_extension,
            )),
            StorageKind::Sqlite => {
                let path = config.storage.sqlite_path.to_string_lossy();
                let storage = SqliteStorage::connect(&path).await.map_err(|e| {
                    PersistenceError::Configuration(format!(
                        "cannot open SQLite store at {}: {}",
                        path, e
                    ))
                })?;
                Arc::new(storage)
            }
            StorageKind::Memory => Arc::new(MemoryStorage::new()),
        };

        let serializer = if config.pretty_json {
            JsonSerializer::pretty()
        } else {
            JsonSerializer::new()
        };

        info!(
            storage = storage.name(),
            serializer = serializer.name(),
            "Persistence orchestrator configured"
        );

        Ok(Self::builder(storage)
            .serializer(Arc::new(serializer))
            .event_capacity(config.event_channel_capacity)
            .build())
    }

    // ---------------------------------------------------------------------
    // Registry
    // ---------------------------------------------------------------------

    /// Register a module, replacing any module with the same id
    ///
    /// Returns a shared handle to the registered instance. A later load
    /// replaces the instance, so look the module up again after `load_all`.
    pub async fn register_module<T: PersistentModule>(
        &self,
        module: T,
    ) -> Result<ModuleCell<T>> {
        self.inner.registry.register_module(module).await
    }

    /// Register a module the caller already shares
    pub async fn register_shared<T: PersistentModule>(
        &self,
        cell: ModuleCell<T>,
    ) -> Result<()> {
        let entry = ModuleEntry::from_shared(cell).await;
        self.inner.registry.register(entry).await.map(|_| ())
    }

    /// Unregister a module; returns whether it was registered
    ///
    /// A queued save for it is dropped (with a warning) by the next flush.
    pub async fn unregister_module(&self, id: &str) -> bool {
        self.inner.registry.unregister(id).await.is_some()
    }

    /// First registered module of type `T`
    pub async fn get_module<T: PersistentModule>(&self) -> Option<ModuleCell<T>> {
        self.inner.registry.find::<T>().await
    }

    /// Registered module `id`, if it is a `T`
    pub async fn get_module_by_id<T: PersistentModule>(&self, id: &str) -> Option<ModuleCell<T>> {
        self.inner.registry.get_as::<T>(id).await
    }

    /// Snapshot of all registered modules, in registration order
    pub async fn modules(&self) -> RegistrySnapshot {
        self.inner.registry.snapshot().await
    }

    /// The underlying registry
    pub fn registry(&self) -> &ModuleRegistry {
        &self.inner.registry
    }

    /// Order in which `load_all` would load the registered modules
    pub async fn resolve_load_order(&self) -> LoadOrder {
        let snapshot = self.inner.registry.snapshot().await;
        resolve_load_order(&snapshot.descriptors().await)
    }

    // ---------------------------------------------------------------------
    // Serializer
    // ---------------------------------------------------------------------

    /// Set or replace the serializer
    pub async fn set_serializer(&self, serializer: Arc<dyn Serializer>) {
        let adapter = SerializerAdapter::new(serializer);
        info!(serializer = adapter.name(), "Serializer configured");
        *self.inner.serializer.write().await = Some(adapter);
    }

    /// Whether a serializer is configured
    pub async fn has_serializer(&self) -> bool {
        self.inner.serializer.read().await.is_some()
    }

    async fn require_serializer(&self, operation: &str) -> Result<SerializerAdapter> {
        match self.inner.serializer.read().await.clone() {
            Some(serializer) => Ok(serializer),
            None => {
                let err = PersistenceError::missing_serializer(operation);
                error!(operation = %operation, "{}", err);
                Err(err)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Saving
    // ---------------------------------------------------------------------

    /// Queue module `id` for the next flush
    ///
    /// Returns `Ok(false)` when it was already queued. Unregistered ids are
    /// rejected and the queue is left unchanged.
    pub async fn request_save(&self, id: &str) -> Result<bool> {
        if !self.inner.registry.contains(id).await {
            warn!(module_id = %id, "Save requested for unregistered module");
            return Err(PersistenceError::NotRegistered(id.to_string()));
        }
        let added = self.inner.queue.enqueue(id).await;
        debug!(module_id = %id, added, "Save requested");
        Ok(added)
    }

    /// Queue every registered module; returns how many were newly queued
    pub async fn request_save_all(&self) -> usize {
        let snapshot = self.inner.registry.snapshot().await;
        let mut added = 0;
        for entry in &snapshot {
            if self.inner.queue.enqueue(entry.id()).await {
                added += 1;
            }
        }
        debug!(added, total = snapshot.len(), "Save requested for all modules");
        added
    }

    /// Ids waiting for the next flush, in request order
    pub async fn pending_saves(&self) -> Vec<ModuleId> {
        self.inner.queue.pending().await
    }

    /// Whether a flush is running
    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.load(Ordering::SeqCst)
    }

    /// Start a flush of the save queue on a background task
    ///
    /// Returns immediately. `Ok(None)` means a flush is already running; the
    /// queue is left for the next one. Must be called within a Tokio runtime.
    ///
    /// # Returns
    /// * `Ok(Some(FlushHandle))` if a flush was started
    /// * `Ok(None)` if a flush was already running
    /// * `Err(PersistenceError::Configuration)` if no serializer is set
    pub async fn force_flush(&self) -> Result<Option<FlushHandle>> {
        // Checked before claiming the flag so nothing is drained
        let serializer = self.require_serializer("force_flush").await?;

        // Claim the single-flight flag
        if self
            .inner
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Flush already in progress; trigger ignored");
            return Ok(None);
        }

        // Released by the guard when the batch ends
        let guard = FlushGuard {
            inner: self.inner.clone(),
        };
        let report = FlushReport::begin();
        let flush_id = report.flush_id;
        let inner = self.inner.clone();
        let span = info_span!("flush", flush_id = %flush_id);

        let task = tokio::spawn(
            async move {
                let report = run_batch(&inner, &serializer, report).await;
                drop(guard);
                inner.emit(PersistenceEvent::BatchSaved(Arc::new(report.clone())));
                report
            }
            .instrument(span),
        );

        Ok(Some(FlushHandle::new(flush_id, task)))
    }

    /// Wait until no flush is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.flush_idle.notified();
            if !self.is_flushing() {
                return;
            }
            notified.await;
        }
    }

    /// Flush whatever is pending and wait for it, bounded by `timeout`
    ///
    /// Intended for the quit path: waits for an in-flight flush, then runs one
    /// final flush if anything is queued. Returns the final flush's report, or
    /// `None` when nothing was pending or the timeout expired.
    ///
    /// # Arguments
    /// * `timeout` - Upper bound on the whole wait, in-flight flush included
    ///
    /// # Returns
    /// * `Ok(Some(FlushReport))` if a final flush ran to completion
    /// * `Ok(None)` if nothing was pending or the timeout expired
    /// * `Err(PersistenceError)` if no serializer is set or the flush task failed
    pub async fn shutdown(&self, timeout: Duration) -> Result<Option<FlushReport>> {
        match tokio::time::timeout(timeout, self.final_flush()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    pending = self.inner.queue.len().await,
                    "Timed out waiting for final flush"
                );
                Ok(None)
            }
        }
    }

    async fn final_flush(&self) -> Result<Option<FlushReport>> {
        loop {
            self.wait_idle().await;
            if self.inner.queue.is_empty().await {
                info!("No pending saves at shutdown");
                return Ok(None);
            }
            // Another trigger may win the race; wait for it and re-check.
            if let Some(handle) = self.force_flush().await? {
                let report = handle.wait().await?;
                info!(
                    saved = report.saved.len(),
                    failed = report.failed.len(),
                    "Final flush completed"
                );
                return Ok(Some(report));
            }
        }
    }

    // ---------------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------------

    /// Load every registered module in dependency + priority order
    ///
    /// Fails only when no serializer is configured. Per-module failures are
    /// logged and listed in the report.
    pub async fn load_all(&self) -> Result<LoadReport> {
        let serializer = self.require_serializer("load_all").await?;
        let resolution = self.resolve_load_order().await;

        let mut report = LoadReport {
            order: resolution.order.clone(),
            cycles: resolution.cycles,
            ..Default::default()
        };

        for id in &resolution.order {
            match self.load_logged(&serializer, id).await {
                Ok(LoadOutcome::Loaded) => report.loaded.push(id.clone()),
                Ok(LoadOutcome::NotFound) => report.not_found.push(id.clone()),
                Err(e) => report.failed.push((id.clone(), e.to_string())),
            }
        }

        info!(
            loaded = report.loaded.len(),
            not_found = report.not_found.len(),
            failed = report.failed.len(),
            cycles = report.cycles.len(),
            "Load completed"
        );
        Ok(report)
    }

    /// Load one module from storage
    ///
    /// `Ok(NotFound)` when nothing is stored (normal for new modules). Errors
    /// mean the module was not loaded; they are also logged.
    ///
    /// # Arguments
    /// * `id` - Id of a registered module
    ///
    /// # Returns
    /// * `Ok(LoadOutcome::Loaded)` if the stored payload replaced the instance
    /// * `Ok(LoadOutcome::NotFound)` if nothing is stored
    /// * `Err(PersistenceError)` if the module is not registered, or storage
    ///   or decoding failed
    pub async fn load_module(&self, id: &str) -> Result<LoadOutcome> {
        let serializer = self.require_serializer("load_module").await?;
        self.load_logged(&serializer, id).await
    }

    async fn load_logged(
        &self,
        serializer: &SerializerAdapter,
        id: &str,
    ) -> Result<LoadOutcome> {
        let result = self.load_with(serializer, id).await;
        match &result {
            Ok(LoadOutcome::Loaded) => debug!(module_id = %id, "Module loaded"),
            Ok(LoadOutcome::NotFound) => debug!(module_id = %id, "No stored payload for module"),
            Err(PersistenceError::NotRegistered(_)) => {
                warn!(module_id = %id, "Load requested for unregistered module")
            }
            Err(e) => error!(module_id = %id, error = %e, "Failed to load module"),
        }
        result
    }

    async fn load_with(
        &self,
        serializer: &SerializerAdapter,
        id: &str,
    ) -> Result<LoadOutcome> {
        let registered = self
            .inner
            .registry
            .get(id)
            .await
            .ok_or_else(|| PersistenceError::NotRegistered(id.to_string()))?;

        // Nothing stored is a normal outcome
        let Some(payload) = self.inner.storage.read(id).await? else {
            return Ok(LoadOutcome::NotFound);
        };

        let loaded = serializer.decode(&registered, &payload)?;
        if loaded.id() != id {
            return Err(PersistenceError::Serialization {
                module_id: id.to_string(),
                source: SerializerError::Decode(format!(
                    "payload describes module '{}'",
                    loaded.id()
                )),
            });
        }

        // Swap in the new instance before its hook runs
        if !self.inner.registry.replace_existing(loaded.clone()).await {
            return Err(PersistenceError::NotRegistered(id.to_string()));
        }

        let ctx = LoadContext::new(self.inner.registry.clone());
        loaded.run_after_load(&ctx).await;

        self.inner.emit(PersistenceEvent::ModuleLoaded { module: loaded });
        Ok(LoadOutcome::Loaded)
    }

    // ---------------------------------------------------------------------
    // Stored data
    // ---------------------------------------------------------------------

    /// Delete the stored payload for `id`; idempotent
    pub async fn delete_module_data(&self, id: &str) -> Result<DeleteOutcome> {
        match self.inner.storage.delete(id).await {
            Ok(true) => {
                info!(module_id = %id, "Deleted stored module data");
                Ok(DeleteOutcome::Deleted)
            }
            Ok(false) => {
                debug!(module_id = %id, "No stored module data to delete");
                Ok(DeleteOutcome::NothingToDelete)
            }
            Err(e) => {
                error!(module_id = %id, error = %e, "Failed to delete module data");
                Err(e)
            }
        }
    }

    /// Whether a payload is stored for `id`
    pub async fn has_saved_data(&self, id: &str) -> Result<bool> {
        self.inner.storage.exists(id).await
    }

    // ---------------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------------

    /// Receive future notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PersistenceEvent> {
        self.inner.events.subscribe()
    }

    /// Future notifications as a `Stream`
    pub fn events(&self) -> BroadcastStream<PersistenceEvent> {
        BroadcastStream::new(self.subscribe())
    }
}

/// Drain the queue and write each module, in save priority order
async fn run_batch(
    inner: &Inner,
    serializer: &SerializerAdapter,
    mut report: FlushReport,
) -> FlushReport {
    let ids = inner.queue.drain_all().await;

    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        match inner.registry.get(&id).await {
            Some(entry) => entries.push(entry),
            None => {
                warn!(module_id = %id, "Dropping save request for unregistered module");
                report.dropped.push(id);
            }
        }
    }

    // Priorities are read now, not at registration.
    let mut keyed = Vec::with_capacity(entries.len());
    for entry in entries {
        let priority = entry.current_descriptor().await.save_priority;
        keyed.push((priority, entry));
    }
    // Stable: equal priorities keep request order.
    keyed.sort_by_key(|(priority, _)| *priority);
    let entries: Vec<ModuleEntry> = keyed.into_iter().map(|(_, entry)| entry).collect();

    debug!(
        modules = entries.len(),
        serializer = serializer.name(),
        storage = inner.storage.name(),
        "Flush started"
    );

    for entry in &entries {
        match save_entry(inner, serializer, entry).await {
            Ok(bytes) => {
                debug!(module_id = %entry.id(), bytes, "Module saved");
                report.saved.push(entry.id().to_string());
            }
            Err(e) => {
                error!(module_id = %entry.id(), error = %e, "Failed to save module");
                report.failed.push(ModuleFailure {
                    module_id: entry.id().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    report.finished_at = Utc::now();
    info!(
        saved = report.saved.len(),
        failed = report.failed.len(),
        dropped = report.dropped.len(),
        duration_ms = report.duration().num_milliseconds(),
        "Flush completed"
    );
    report
}

async fn save_entry(
    inner: &Inner,
    serializer: &SerializerAdapter,
    entry: &ModuleEntry,
) -> Result<usize> {
    let payload = serializer.encode(entry).await?;
    inner.storage.write(entry.id(), &payload).await?;
    Ok(payload.len())
}
