//! Load and delete outcomes

use super::graph::DependencyCycle;
use crate::module::ModuleId;

/// Result of loading one module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A stored payload was decoded and replaced the registered instance
    Loaded,
    /// Nothing is stored for the module; the registered instance is untouched
    NotFound,
}

/// Result of deleting a module's stored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// A payload existed and was removed
    Deleted,
    /// There was nothing to delete
    NothingToDelete,
}

/// Summary of a `load_all` run
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Modules in the order they were loaded
    pub order: Vec<ModuleId>,
    /// Modules that were loaded from storage
    pub loaded: Vec<ModuleId>,
    /// Modules with no stored payload
    pub not_found: Vec<ModuleId>,
    /// Modules that failed to load, with the error message
    pub failed: Vec<(ModuleId, String)>,
    /// Dependency cycles broken while resolving the order
    pub cycles: Vec<DependencyCycle>,
}

impl LoadReport {
    /// Whether no module failed to load
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}
