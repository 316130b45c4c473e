//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use module_persistence::{
    JsonSerializer, LoadContext, MemoryStorage, ModuleId, PersistenceOrchestrator,
    PersistentModule, StorageBackend, StorageError,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub volume: u8,
    pub language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: 50,
            language: "en".to_string(),
        }
    }
}

impl PersistentModule for Settings {
    fn id(&self) -> &str {
        "Settings"
    }

    fn load_priority(&self) -> i32 {
        1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub level: u32,
    pub experience: u64,
    /// Volume seen in `Settings` during the post-load hook
    #[serde(skip)]
    pub observed_volume: Option<u8>,
}

#[async_trait]
impl PersistentModule for PlayerStats {
    fn id(&self) -> &str {
        "PlayerStats"
    }

    fn dependencies(&self) -> Vec<ModuleId> {
        vec!["Settings".to_string()]
    }

    fn save_priority(&self) -> i32 {
        10
    }

    fn load_priority(&self) -> i32 {
        10
    }

    async fn after_load(&mut self, ctx: &LoadContext) {
        if let Some(settings) = ctx.get_module::<Settings>().await {
            self.observed_volume = Some(settings.read().await.volume);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameProgress {
    pub checkpoint: String,
    pub saves: u32,
}

impl PersistentModule for GameProgress {
    fn id(&self) -> &str {
        "GameProgress"
    }

    fn dependencies(&self) -> Vec<ModuleId> {
        vec!["PlayerStats".to_string()]
    }

    fn load_priority(&self) -> i32 {
        50
    }

    fn before_save(&mut self) {
        self.saves += 1;
    }
}

/// Module whose id and dependencies are data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub name: String,
    pub text: String,
    pub depends_on: Vec<String>,
}

impl Note {
    pub fn new(name: &str, depends_on: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            text: String::new(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl PersistentModule for Note {
    fn id(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<ModuleId> {
        self.depends_on.clone()
    }
}

/// Orchestrator over `storage` with a compact JSON serializer
pub fn orchestrator_with(storage: Arc<dyn StorageBackend>) -> PersistenceOrchestrator {
    PersistenceOrchestrator::builder(storage)
        .serializer(Arc::new(JsonSerializer::new()))
        .build()
}

/// Register the three game modules with default state
pub async fn register_game_modules(orchestrator: &PersistenceOrchestrator) {
    orchestrator.register_module(Settings::default()).await.unwrap();
    orchestrator.register_module(PlayerStats::default()).await.unwrap();
    orchestrator.register_module(GameProgress::default()).await.unwrap();
}

/// Memory storage whose writes block until the gate is opened
pub struct GatedStorage {
    inner: MemoryStorage,
    gate: Semaphore,
    entered: Notify,
    writes: AtomicUsize,
}

impl GatedStorage {
    /// Gate starts closed
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStorage::new(),
            gate: Semaphore::new(0),
            entered: Notify::new(),
            writes: AtomicUsize::new(0),
        })
    }

    /// Gate starts open
    pub fn open() -> Arc<Self> {
        let storage = Self::closed();
        storage.release();
        storage
    }

    /// Let blocked and future writes through
    pub fn release(&self) {
        self.gate.add_permits(64);
    }

    /// Wait until a write has reached the gate
    pub async fn wait_for_write(&self) {
        self.entered.notified().await;
    }

    /// Completed writes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn memory(&self) -> &MemoryStorage {
        &self.inner
    }
}

#[async_trait]
impl StorageBackend for GatedStorage {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, payload: &[u8]) -> Result<(), StorageError> {
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?;
        self.inner.write(key, payload).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.delete(key).await
    }
}
