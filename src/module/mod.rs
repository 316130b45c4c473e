//! Persistable modules
//!
//! A module is a named unit of application state. Applications implement
//! [`PersistentModule`] for each state type and register instances with the
//! orchestrator, which stores them type-erased behind [`ModuleEntry`]. The
//! decode function for each module is captured at registration through
//! generics, so loading never needs runtime type lookup.

pub mod registry;

use crate::serializer::SerializerError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::RwLock;

pub use registry::{ModuleRegistry, RegistrySnapshot};

/// Unique identifier for a module
pub type ModuleId = String;

/// Priority given to modules that do not override it
///
/// Lower values sort earlier.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Shared, lockable handle to a registered module
pub type ModuleCell<T> = Arc<RwLock<T>>;

/// Capability implemented by every persistable module
#[async_trait]
pub trait PersistentModule: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identity and storage key; must not be empty
    fn id(&self) -> &str;

    /// Ids of modules that must be loaded before this one
    ///
    /// Re-read every time an order is resolved, so it may depend on state.
    fn dependencies(&self) -> Vec<ModuleId> {
        Vec::new()
    }

    /// Ordering hint within a save batch, re-read at each flush
    fn save_priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// Ordering hint applied on top of dependency order when loading
    ///
    /// Must not be lower than the priority of anything this module depends
    /// on, otherwise the stable priority sort can move it ahead of them.
    fn load_priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// Called right before the module is serialized
    fn before_save(&mut self) {}

    /// Called after a freshly loaded instance has replaced the registered one
    ///
    /// Modules loaded earlier in the same `load_all` are visible through `ctx`.
    async fn after_load(&mut self, _ctx: &LoadContext) {}
}

/// Ordering metadata captured from a module when it enters the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Module id
    pub id: ModuleId,
    /// Declared dependencies, deduplicated, declaration order kept
    pub dependencies: Vec<ModuleId>,
    /// Save ordering hint
    pub save_priority: i32,
    /// Load ordering hint
    pub load_priority: i32,
}

impl ModuleDescriptor {
    /// Build a descriptor with default priorities and no dependencies
    pub fn new(id: impl Into<ModuleId>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            save_priority: DEFAULT_PRIORITY,
            load_priority: DEFAULT_PRIORITY,
        }
    }

    /// Set the dependencies (duplicates are dropped)
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ModuleId>,
    {
        let mut deps: Vec<ModuleId> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        self.dependencies = deps;
        self
    }

    /// Set the save priority
    pub fn with_save_priority(mut self, priority: i32) -> Self {
        self.save_priority = priority;
        self
    }

    /// Set the load priority
    pub fn with_load_priority(mut self, priority: i32) -> Self {
        self.load_priority = priority;
        self
    }

    fn of<T: PersistentModule>(module: &T) -> Self {
        Self::new(module.id())
            .with_dependencies(module.dependencies())
            .with_save_priority(module.save_priority())
            .with_load_priority(module.load_priority())
    }
}

/// Type-erased operations on a registered module
#[async_trait]
trait ErasedModule: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// The `ModuleCell<T>` as `Any`, for typed lookups
    fn cell_any(&self) -> &(dyn Any + Send + Sync);

    /// Run the pre-save hook and capture the state as a document
    async fn snapshot_document(&self) -> Result<Value, SerializerError>;

    /// Ordering metadata as the module declares it right now
    async fn current_descriptor(&self) -> ModuleDescriptor;

    /// Decode a document into a new instance of the same concrete type
    fn decode(&self, document: Value) -> Result<ModuleEntry, SerializerError>;

    async fn run_after_load(&self, ctx: &LoadContext);
}

struct TypedModule<T: PersistentModule> {
    cell: ModuleCell<T>,
}

#[async_trait]
impl<T: PersistentModule> ErasedModule for TypedModule<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn cell_any(&self) -> &(dyn Any + Send + Sync) {
        &self.cell
    }

    async fn snapshot_document(&self) -> Result<Value, SerializerError> {
        let mut module = self.cell.write().await;
        module.before_save();
        serde_json::to_value(&*module).map_err(|e| SerializerError::Encode(e.to_string()))
    }

    async fn current_descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::of(&*self.cell.read().await)
    }

    fn decode(&self, document: Value) -> Result<ModuleEntry, SerializerError> {
        let module: T =
            serde_json::from_value(document).map_err(|e| SerializerError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                message: e.to_string(),
            })?;
        Ok(ModuleEntry::new(module))
    }

    async fn run_after_load(&self, ctx: &LoadContext) {
        self.cell.write().await.after_load(ctx).await;
    }
}

/// A registered module: ordering metadata plus the type-erased instance
#[derive(Clone)]
pub struct ModuleEntry {
    descriptor: Arc<ModuleDescriptor>,
    module: Arc<dyn ErasedModule>,
}

impl ModuleEntry {
    /// Wrap a module instance
    pub fn new<T: PersistentModule>(module: T) -> Self {
        let descriptor = ModuleDescriptor::of(&module);
        Self::from_cell(Arc::new(RwLock::new(module)), descriptor)
    }

    /// Wrap an already shared module, reading its metadata under the lock
    pub async fn from_shared<T: PersistentModule>(cell: ModuleCell<T>) -> Self {
        let descriptor = ModuleDescriptor::of(&*cell.read().await);
        Self::from_cell(cell, descriptor)
    }

    fn from_cell<T: PersistentModule>(cell: ModuleCell<T>, descriptor: ModuleDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            module: Arc::new(TypedModule { cell }),
        }
    }

    /// Module id
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Ordering metadata captured at registration
    ///
    /// Use [`ModuleEntry::current_descriptor`] for ordering decisions.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Ordering metadata re-read from the module under its read lock
    ///
    /// The id stays the registry key even if the module now reports another.
    /// Waits while someone holds the module's write lock.
    pub async fn current_descriptor(&self) -> ModuleDescriptor {
        let mut descriptor = self.module.current_descriptor().await;
        descriptor.id = self.descriptor.id.clone();
        descriptor
    }

    /// Rust type name of the module
    pub fn type_name(&self) -> &'static str {
        self.module.type_name()
    }

    /// Typed handle, if the module is a `T`
    pub fn downcast<T: PersistentModule>(&self) -> Option<ModuleCell<T>> {
        self.module
            .cell_any()
            .downcast_ref::<ModuleCell<T>>()
            .cloned()
    }

    /// Whether the module is a `T`
    pub fn is<T: PersistentModule>(&self) -> bool {
        self.module.cell_any().is::<ModuleCell<T>>()
    }

    /// Whether both entries hold the same instance
    pub fn same_instance(&self, other: &ModuleEntry) -> bool {
        Arc::ptr_eq(&self.module, &other.module)
    }

    pub(crate) async fn snapshot_document(&self) -> Result<Value, SerializerError> {
        self.module.snapshot_document().await
    }

    pub(crate) fn decode(&self, document: Value) -> Result<ModuleEntry, SerializerError> {
        self.module.decode(document)
    }

    pub(crate) async fn run_after_load(&self, ctx: &LoadContext) {
        self.module.run_after_load(ctx).await
    }
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("id", &self.descriptor.id)
            .field("type", &self.type_name())
            .field("dependencies", &self.descriptor.dependencies)
            .field("save_priority", &self.descriptor.save_priority)
            .field("load_priority", &self.descriptor.load_priority)
            .finish()
    }
}

/// View of the registry handed to `after_load` hooks
#[derive(Clone)]
pub struct LoadContext {
    registry: ModuleRegistry,
}

impl LoadContext {
    pub(crate) fn new(registry: ModuleRegistry) -> Self {
        Self { registry }
    }

    /// First registered module of type `T`
    ///
    /// Locking the module whose hook is currently running deadlocks; query
    /// other modules only.
    pub async fn get_module<T: PersistentModule>(&self) -> Option<ModuleCell<T>> {
        self.registry.find::<T>().await
    }

    /// Registered module `id`, if it is a `T`
    pub async fn get_module_by_id<T: PersistentModule>(&self, id: &str) -> Option<ModuleCell<T>> {
        self.registry.get_as::<T>(id).await
    }
}
