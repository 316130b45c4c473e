//! Notifications emitted by the orchestrator

use super::flush::FlushReport;
use crate::module::ModuleEntry;
use std::sync::Arc;

/// Default capacity of the notification channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Persistence notifications
///
/// Delivered over a `tokio::sync::broadcast` channel; slow subscribers may
/// observe `RecvError::Lagged` and miss events.
#[derive(Debug, Clone)]
pub enum PersistenceEvent {
    /// A save flush finished writing its whole batch (successes and failures)
    BatchSaved(Arc<FlushReport>),
    /// A module was loaded and has replaced the registered instance
    ModuleLoaded {
        /// The freshly loaded module
        module: ModuleEntry,
    },
}

impl PersistenceEvent {
    /// Short event name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            PersistenceEvent::BatchSaved(_) => "batch_saved",
            PersistenceEvent::ModuleLoaded { .. } => "module_loaded",
        }
    }
}
