//! Application configuration
//!
//! Configuration is read from environment variables, with defaults for
//! anything unset or unparsable.

use crate::error::{PersistenceError, Result};
use crate::orchestrator::DEFAULT_EVENT_CAPACITY;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which storage backend to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// One file per module under the data directory
    File,
    /// One row per module in a SQLite database
    Sqlite,
    /// In-process only; nothing survives a restart
    Memory,
}

impl StorageKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" | "files" => Some(StorageKind::File),
            "sqlite" => Some(StorageKind::Sqlite),
            "memory" | "mem" => Some(StorageKind::Memory),
            _ => None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,
    /// Write pretty-printed JSON payloads
    pub pretty_json: bool,
    /// Autosave period; `None` disables autosave
    pub autosave_interval: Option<Duration>,
    /// Upper bound on the final flush at shutdown
    pub shutdown_flush_timeout: Duration,
    /// Capacity of the notification channel
    pub event_channel_capacity: usize,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Backend to use
    pub kind: StorageKind,
    /// Base directory for module payloads
    pub data_dir: PathBuf,
    /// Extension of payload files (file backend)
    pub file_extension: String,
    /// Database file (sqlite backend)
    pub sqlite_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            storage: StorageConfig {
                kind: StorageKind::File,
                sqlite_path: data_dir.join("modules.db"),
                data_dir,
                file_extension: "json".to_string(),
            },
            pretty_json: true,
            autosave_interval: Some(Duration::from_secs(30)),
            shutdown_flush_timeout: Duration::from_secs(5),
            event_channel_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let kind = match env::var("PERSISTENCE_BACKEND") {
            Ok(value) => StorageKind::parse(&value).unwrap_or_else(|| {
                tracing::warn!(value = %value, "Unknown PERSISTENCE_BACKEND, using file storage");
                StorageKind::File
            }),
            Err(_) => defaults.storage.kind,
        };

        let data_dir = env::var_os("PERSISTENCE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage.data_dir);

        let sqlite_path = env::var_os("PERSISTENCE_SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("modules.db"));

        let autosave_secs: u64 = env::var("AUTOSAVE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Self {
            storage: StorageConfig {
                kind,
                data_dir,
                file_extension: env::var("PERSISTENCE_FILE_EXTENSION")
                    .unwrap_or(defaults.storage.file_extension),
                sqlite_path,
            },
            pretty_json: env::var("PERSISTENCE_PRETTY_JSON")
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.pretty_json),
            autosave_interval: (autosave_secs > 0).then(|| Duration::from_secs(autosave_secs)),
            shutdown_flush_timeout: env::var("SHUTDOWN_FLUSH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_flush_timeout),
            event_channel_capacity: env::var("EVENT_CHANNEL_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.event_channel_capacity),
        }
    }

    /// Configuration backed by in-process memory storage
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.storage.kind = StorageKind::Memory;
        config
    }

    /// Reject values the orchestrator cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(PersistenceError::Configuration(
                "event channel capacity must be at least 1".to_string(),
            ));
        }
        let extension = self.storage.file_extension.trim_start_matches('.');
        if extension.trim().is_empty() {
            return Err(PersistenceError::Configuration(
                "payload file extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    // ~/.module-persistence, or relative to the working directory
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".module-persistence"),
        None => PathBuf::from(".module-persistence"),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
