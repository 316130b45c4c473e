//! Save flush results and handles

use crate::error::{PersistenceError, Result};
use crate::module::ModuleId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A module whose save failed during a flush
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleFailure {
    /// Module that failed
    pub module_id: ModuleId,
    /// Error message
    pub error: String,
}

/// Outcome of one save flush
#[derive(Debug, Clone, Serialize)]
pub struct FlushReport {
    /// Unique id of the flush, also recorded on its tracing span
    pub flush_id: Uuid,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// When the last write finished
    pub finished_at: DateTime<Utc>,
    /// Modules written successfully, in write order
    pub saved: Vec<ModuleId>,
    /// Modules whose save failed
    pub failed: Vec<ModuleFailure>,
    /// Queued ids whose module was unregistered before the flush ran
    pub dropped: Vec<ModuleId>,
}

impl FlushReport {
    pub(crate) fn begin() -> Self {
        let now = Utc::now();
        Self {
            flush_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            saved: Vec::new(),
            failed: Vec::new(),
            dropped: Vec::new(),
        }
    }

    /// Whether every module in the batch was written
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of modules the flush attempted to write
    pub fn attempted(&self) -> usize {
        self.saved.len() + self.failed.len()
    }

    /// Wall-clock duration of the flush
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Handle to a running flush
///
/// Await [`FlushHandle::wait`] to block until every write has finished, or
/// drop the handle to let the flush complete in the background.
#[derive(Debug)]
pub struct FlushHandle {
    flush_id: Uuid,
    task: JoinHandle<FlushReport>,
}

impl FlushHandle {
    pub(crate) fn new(flush_id: Uuid, task: JoinHandle<FlushReport>) -> Self {
        Self { flush_id, task }
    }

    /// Id of the flush this handle tracks
    pub fn flush_id(&self) -> Uuid {
        self.flush_id
    }

    /// Whether the flush has completed
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the batch to finish
    pub async fn wait(self) -> Result<FlushReport> {
        self.task
            .await
            .map_err(|e| PersistenceError::FlushTask(e.to_string()))
    }
}
