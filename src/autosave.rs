//! Periodic autosave
//!
//! A timer task that starts a flush whenever saves are pending. It only uses
//! the orchestrator's public operations.

use crate::orchestrator::PersistenceOrchestrator;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handle to a running autosave task
#[derive(Debug)]
pub struct AutosaveHandle {
    task: JoinHandle<()>,
    interval: Duration,
}

impl AutosaveHandle {
    /// Autosave period
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the task has stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the timer; a flush it already started keeps running
    pub fn stop(self) {
        self.task.abort();
        info!("Autosave stopped");
    }
}

/// Start autosaving every `interval`
///
/// The first tick happens one full interval after the call.
pub fn spawn(orchestrator: PersistenceOrchestrator, interval: Duration) -> AutosaveHandle {
    info!(interval_secs = interval.as_secs_f64(), "Autosave started");

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if orchestrator.pending_saves().await.is_empty() {
                continue;
            }

            match orchestrator.force_flush().await {
                Ok(Some(handle)) => debug!(flush_id = %handle.flush_id(), "Autosave flush started"),
                Ok(None) => debug!("Autosave skipped; flush already running"),
                Err(e) => warn!(error = %e, "Autosave flush could not start"),
            }
        }
    });

    AutosaveHandle { task, interval }
}
