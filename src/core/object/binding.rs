//! Object bindings: a named use of a source at a scope.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::object::{ManagedObjectPool, ManagedObjectSource};

/// Lifetime of a managed object's container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectScope {
    /// One container per process; recycled when the process completes.
    #[default]
    Process,
    /// One container per thread state; recycled when the thread completes.
    Thread,
    /// One container per function execution; recycled after the body.
    Function,
}

impl ObjectScope {
    /// Whether an object of this scope may depend on an object of `other`.
    #[must_use]
    pub const fn may_depend_on(self, other: Self) -> bool {
        self.rank() <= other.rank()
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Function => 0,
            Self::Thread => 1,
            Self::Process => 2,
        }
    }
}

/// Declares a managed object: its source, scope, dependencies and pool.
#[derive(Clone)]
pub struct ObjectDeclaration {
    pub(crate) name: String,
    pub(crate) source: String,
    pub(crate) scope: ObjectScope,
    pub(crate) dependencies: Vec<(String, String)>,
    pub(crate) pool: Option<Arc<dyn ManagedObjectPool>>,
}

impl ObjectDeclaration {
    /// Object `name` sourced from the source registered as `source`.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            scope: ObjectScope::default(),
            dependencies: Vec::new(),
            pool: None,
        }
    }

    /// Container scope.
    #[must_use]
    pub const fn with_scope(mut self, scope: ObjectScope) -> Self {
        self.scope = scope;
        self
    }

    /// Satisfy the source's dependency `key` with the object named `object`.
    #[must_use]
    pub fn with_dependency(mut self, key: impl Into<String>, object: impl Into<String>) -> Self {
        self.dependencies.push((key.into(), object.into()));
        self
    }

    /// Route sourcing through `pool`.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<dyn ManagedObjectPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Object name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ObjectDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectDeclaration")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("scope", &self.scope)
            .field("dependencies", &self.dependencies)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

/// A declaration resolved against the source registry.
pub(crate) struct ObjectBinding {
    pub index: usize,
    pub name: String,
    pub scope: ObjectScope,
    pub source: Arc<dyn ManagedObjectSource>,
    pub object_type: String,
    /// Binding indices, in the source's dependency key order.
    pub dependencies: Vec<usize>,
    pub pool: Option<Arc<dyn ManagedObjectPool>>,
    /// Recycle function index.
    pub recycle: Option<usize>,
}
