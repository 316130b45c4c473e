//! Load order resolution
//!
//! Orders modules so that every registered dependency comes before its
//! dependents, then refines the order by load priority with a stable sort.
//! A misconfigured graph never fails resolution: cycles are broken at the
//! back-edge and reported, dangling dependencies are skipped and reported.

use crate::module::{ModuleDescriptor, ModuleId};
use std::collections::HashMap;

/// A dependency cycle found during resolution
///
/// `path` starts and ends with the same id, e.g. `["A", "B", "A"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCycle {
    /// Ids along the cycle
    pub path: Vec<ModuleId>,
}

impl std::fmt::Display for DependencyCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.join(" -> "))
    }
}

/// A dependency on a module that is not registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingDependency {
    /// Module declaring the dependency
    pub module_id: ModuleId,
    /// Unregistered dependency id
    pub missing: ModuleId,
}

/// A module whose load priority sorts it ahead of one of its dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityInversion {
    /// Dependent module
    pub module_id: ModuleId,
    /// Its load priority
    pub load_priority: i32,
    /// Dependency with a higher load priority
    pub dependency: ModuleId,
    /// The dependency's load priority
    pub dependency_priority: i32,
}

/// Result of resolving the load order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOrder {
    /// Every module exactly once, in load order
    pub order: Vec<ModuleId>,
    /// Cycles that had to be broken
    pub cycles: Vec<DependencyCycle>,
    /// Dependencies that were ignored because they are not registered
    pub dangling: Vec<DanglingDependency>,
    /// Priority assignments that can override dependency order
    pub priority_inversions: Vec<PriorityInversion>,
}

impl LoadOrder {
    /// Whether the graph resolved without cycles or priority inversions
    pub fn is_clean(&self) -> bool {
        self.cycles.is_empty() && self.priority_inversions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Visited,
}

struct Resolver<'a> {
    modules: HashMap<&'a str, &'a ModuleDescriptor>,
    state: HashMap<&'a str, VisitState>,
    /// Ids currently on the DFS path, for cycle reporting
    stack: Vec<&'a str>,
    order: Vec<&'a ModuleDescriptor>,
    cycles: Vec<DependencyCycle>,
    dangling: Vec<DanglingDependency>,
}

impl<'a> Resolver<'a> {
    /// Depth-first walk from `root` with an explicit frame stack
    ///
    /// Each frame is a module and the index of its next dependency to visit.
    fn visit(&mut self, root: &'a ModuleDescriptor) {
        let mut frames: Vec<(&'a ModuleDescriptor, usize)> = Vec::new();
        self.enter(root);
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let (descriptor, next) = *frame;
            let Some(dep) = descriptor.dependencies.get(next) else {
                frames.pop();
                self.leave(descriptor);
                continue;
            };
            frame.1 += 1;

            let Some(dep_descriptor) = self.modules.get(dep.as_str()).copied() else {
                self.dangling.push(DanglingDependency {
                    module_id: descriptor.id.clone(),
                    missing: dep.clone(),
                });
                continue;
            };

            match self.state.get(dep.as_str()) {
                Some(VisitState::Visited) => {}
                Some(VisitState::Visiting) => self.record_cycle(dep),
                None => {
                    self.enter(dep_descriptor);
                    frames.push((dep_descriptor, 0));
                }
            }
        }
    }

    fn enter(&mut self, descriptor: &'a ModuleDescriptor) {
        let id = descriptor.id.as_str();
        self.state.insert(id, VisitState::Visiting);
        self.stack.push(id);
    }

    fn leave(&mut self, descriptor: &'a ModuleDescriptor) {
        self.stack.pop();
        self.state.insert(descriptor.id.as_str(), VisitState::Visited);
        self.order.push(descriptor);
    }

    /// Record the path from `dep` (already on the path) back to itself
    fn record_cycle(&mut self, dep: &ModuleId) {
        let start = self
            .stack
            .iter()
            .position(|on_path| *on_path == dep.as_str())
            .unwrap_or(0);
        let mut path: Vec<ModuleId> = self.stack[start..].iter().map(|s| s.to_string()).collect();
        path.push(dep.clone());
        self.cycles.push(DependencyCycle { path });
    }
}

/// Resolve the load order of `modules` (given in registration order)
///
/// Duplicate ids keep their first occurrence.
pub fn resolve_load_order(modules: &[ModuleDescriptor]) -> LoadOrder {
    let mut unique: Vec<&ModuleDescriptor> = Vec::with_capacity(modules.len());
    let mut by_id: HashMap<&str, &ModuleDescriptor> = HashMap::with_capacity(modules.len());
    for descriptor in modules {
        if !by_id.contains_key(descriptor.id.as_str()) {
            by_id.insert(descriptor.id.as_str(), descriptor);
            unique.push(descriptor);
        }
    }

    let mut resolver = Resolver {
        modules: by_id,
        state: HashMap::new(),
        stack: Vec::new(),
        order: Vec::with_capacity(unique.len()),
        cycles: Vec::new(),
        dangling: Vec::new(),
    };

    for descriptor in &unique {
        if !resolver.state.contains_key(descriptor.id.as_str()) {
            resolver.visit(descriptor);
        }
    }

    let mut sorted = resolver.order;
    // Stable: equal priorities keep their topological order.
    sorted.sort_by_key(|descriptor| descriptor.load_priority);

    let priority_inversions = find_priority_inversions(&unique, &resolver.modules);

    for cycle in &resolver.cycles {
        tracing::warn!(cycle = %cycle, "Dependency cycle detected; back-edge ignored");
    }
    for dangling in &resolver.dangling {
        tracing::debug!(
            module_id = %dangling.module_id,
            missing = %dangling.missing,
            "Ignoring dependency on unregistered module"
        );
    }
    for inversion in &priority_inversions {
        tracing::warn!(
            module_id = %inversion.module_id,
            load_priority = inversion.load_priority,
            dependency = %inversion.dependency,
            dependency_priority = inversion.dependency_priority,
            "Load priority is lower than a dependency's; module may load before it"
        );
    }

    LoadOrder {
        order: sorted.into_iter().map(|d| d.id.clone()).collect(),
        cycles: resolver.cycles,
        dangling: resolver.dangling,
        priority_inversions,
    }
}

fn find_priority_inversions(
    modules: &[&ModuleDescriptor],
    by_id: &HashMap<&str, &ModuleDescriptor>,
) -> Vec<PriorityInversion> {
    let mut inversions = Vec::new();
    for descriptor in modules {
        for dep in &descriptor.dependencies {
            if let Some(dependency) = by_id.get(dep.as_str()) {
                if descriptor.load_priority < dependency.load_priority {
                    inversions.push(PriorityInversion {
                        module_id: descriptor.id.clone(),
                        load_priority: descriptor.load_priority,
                        dependency: dependency.id.clone(),
                        dependency_priority: dependency.load_priority,
                    });
                }
            }
        }
    }
    inversions
}
