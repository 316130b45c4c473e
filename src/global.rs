//! Process-wide orchestrator accessor
//!
//! For code that cannot be handed an orchestrator explicitly. Install one at
//! startup and uninstall it at teardown; nothing is created implicitly.

use crate::error::{PersistenceError, Result};
use crate::orchestrator::PersistenceOrchestrator;
use once_cell::sync::Lazy;
use std::sync::RwLock;

static CURRENT: Lazy<RwLock<Option<PersistenceOrchestrator>>> = Lazy::new(|| RwLock::new(None));

/// Install `orchestrator` as the process-wide instance
///
/// Fails if one is already installed.
pub fn install(orchestrator: PersistenceOrchestrator) -> Result<()> {
    let mut slot = CURRENT
        .write()
        .map_err(|_| PersistenceError::Internal(anyhow::anyhow!("global orchestrator lock poisoned")))?;
    if slot.is_some() {
        return Err(PersistenceError::Configuration(
            "a global orchestrator is already installed".to_string(),
        ));
    }
    *slot = Some(orchestrator);
    tracing::debug!("Global orchestrator installed");
    Ok(())
}

/// The installed orchestrator, if any
pub fn current() -> Option<PersistenceOrchestrator> {
    CURRENT.read().ok().and_then(|slot| slot.clone())
}

/// Remove and return the installed orchestrator
pub fn uninstall() -> Option<PersistenceOrchestrator> {
    let removed = CURRENT.write().ok().and_then(|mut slot| slot.take());
    if removed.is_some() {
        tracing::debug!("Global orchestrator uninstalled");
    }
    removed
}
