//! Save request queue
//!
//! Insertion-ordered set of module ids waiting to be saved. Enqueue is
//! idempotent and draining is atomic: ids added after a drain belong to the
//! next flush.

use crate::module::ModuleId;
use std::collections::HashSet;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct PendingSet {
    order: Vec<ModuleId>,
    members: HashSet<ModuleId>,
}

/// Pending save requests
#[derive(Debug, Default)]
pub struct SaveQueue {
    pending: Mutex<PendingSet>,
}

impl SaveQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` unless it is already queued; returns whether it was added
    ///
    /// Registration checks are the caller's job.
    pub async fn enqueue(&self, id: &str) -> bool {
        let mut pending = self.pending.lock().await;
        if pending.members.contains(id) {
            return false;
        }
        pending.members.insert(id.to_string());
        pending.order.push(id.to_string());
        true
    }

    /// Remove and return every queued id, in insertion order
    pub async fn drain_all(&self) -> Vec<ModuleId> {
        let mut pending = self.pending.lock().await;
        let drained = std::mem::take(&mut *pending);
        drained.order
    }

    /// Queued ids without removing them
    pub async fn pending(&self) -> Vec<ModuleId> {
        self.pending.lock().await.order.clone()
    }

    /// Whether `id` is queued
    pub async fn contains(&self, id: &str) -> bool {
        self.pending.lock().await.members.contains(id)
    }

    /// Number of queued ids
    pub async fn len(&self) -> usize {
        self.pending.lock().await.order.len()
    }

    /// Whether nothing is queued
    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.order.is_empty()
    }
}
