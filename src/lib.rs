//! Module Persistence Library
//!
//! Saves and loads application state that is split into independent modules.
//! Modules declare load dependencies and priorities; the orchestrator batches
//! save requests into single-flight flushes and loads modules in dependency
//! order through pluggable serializers and storage backends.
//!
//! The demo binary is in `src/main.rs`.

pub mod autosave;
pub mod config;
pub mod error;
pub mod global;
pub mod module;
pub mod orchestrator;
pub mod serializer;
pub mod storage;

pub use config::{Config, StorageKind};
pub use error::{PersistenceError, StorageOperation};
pub use module::{
    LoadContext, ModuleCell, ModuleDescriptor, ModuleEntry, ModuleId, ModuleRegistry,
    PersistentModule, DEFAULT_PRIORITY,
};
pub use orchestrator::{
    DeleteOutcome, FlushHandle, FlushReport, LoadOrder, LoadOutcome, LoadReport,
    PersistenceEvent, PersistenceOrchestrator,
};
pub use serializer::{JsonSerializer, Serializer, SerializerError};
pub use storage::{FileStorage, MemoryStorage, SqliteStorage, StorageBackend, StorageError};
