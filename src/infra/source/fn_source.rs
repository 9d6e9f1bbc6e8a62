//! Managed object sources backed by closures.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::core::{
    Escalation, FunctionContext, ManagedObject, ManagedObjectSource, ManagedObjectUser,
    SourceContext, SourceError, SourceMetaData, SourceSpecification,
};

type Factory = dyn Fn(&ManagedObjectUser) -> Result<ManagedObject, SourceError> + Send + Sync;
type Recycler = dyn Fn(&mut FunctionContext) -> Result<(), Escalation> + Send + Sync;

/// Sources each object synchronously by calling a closure.
///
/// The closure sees the [`ManagedObjectUser`], so it can read the objects
/// bound to the keys declared with [`with_dependency`](Self::with_dependency).
pub struct FnSource {
    object_type: String,
    dependency_keys: Vec<String>,
    required: Vec<String>,
    recycle: Option<Arc<Recycler>>,
    factory: Arc<Factory>,
}

impl FnSource {
    /// Source objects of `object_type` produced by `factory`.
    pub fn new<T, F>(object_type: impl Into<String>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&ManagedObjectUser) -> Result<T, SourceError> + Send + Sync + 'static,
    {
        Self {
            object_type: object_type.into(),
            dependency_keys: Vec::new(),
            required: Vec::new(),
            recycle: None,
            factory: Arc::new(move |user: &ManagedObjectUser| {
                factory(user).map(|object| Arc::new(object) as ManagedObject)
            }),
        }
    }

    /// Declare a dependency key; the object bound to it is resolved first.
    #[must_use]
    pub fn with_dependency(mut self, key: impl Into<String>) -> Self {
        self.dependency_keys.push(key.into());
        self
    }

    /// Declare a required property.
    #[must_use]
    pub fn with_required_property(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Recycle objects with `recycle` when their scope ends.
    #[must_use]
    pub fn with_recycle<F>(mut self, recycle: F) -> Self
    where
        F: Fn(&mut FunctionContext) -> Result<(), Escalation> + Send + Sync + 'static,
    {
        self.recycle = Some(Arc::new(recycle));
        self
    }
}

impl ManagedObjectSource for FnSource {
    fn specification(&self) -> SourceSpecification {
        self.required
            .iter()
            .fold(SourceSpecification::new(), |spec, name| spec.with_property(name.clone()))
    }

    fn init(&mut self, context: &mut SourceContext) -> Result<SourceMetaData, SourceError> {
        if let Some(recycle) = &self.recycle {
            let recycle = Arc::clone(recycle);
            context.set_recycle_fn(move |ctx| recycle(ctx));
        }
        Ok(self
            .dependency_keys
            .iter()
            .fold(SourceMetaData::new(self.object_type.clone()), |meta, key| {
                meta.with_dependency(key.clone())
            }))
    }

    fn source_managed_object(&self, user: ManagedObjectUser) {
        match (self.factory)(&user) {
            Ok(object) => user.set_shared_object(object),
            Err(e) => user.on_failure(e),
        }
    }
}

impl fmt::Debug for FnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSource")
            .field("object_type", &self.object_type)
            .field("dependency_keys", &self.dependency_keys)
            .field("recycles", &self.recycle.is_some())
            .finish_non_exhaustive()
    }
}

/// Hands out the same shared object to every sourcing.
pub struct SingletonSource {
    object_type: String,
    object: ManagedObject,
    recycle: Option<Arc<Recycler>>,
}

impl SingletonSource {
    /// Share `object` under `object_type`.
    pub fn new<T: Any + Send + Sync>(object_type: impl Into<String>, object: T) -> Self {
        Self::from_shared(object_type, Arc::new(object))
    }

    /// Share an object that is already behind an `Arc`.
    pub fn from_shared(object_type: impl Into<String>, object: ManagedObject) -> Self {
        Self {
            object_type: object_type.into(),
            object,
            recycle: None,
        }
    }

    /// Run `recycle` each time a scope holding the object ends.
    #[must_use]
    pub fn with_recycle<F>(mut self, recycle: F) -> Self
    where
        F: Fn(&mut FunctionContext) -> Result<(), Escalation> + Send + Sync + 'static,
    {
        self.recycle = Some(Arc::new(recycle));
        self
    }
}

impl ManagedObjectSource for SingletonSource {
    fn init(&mut self, context: &mut SourceContext) -> Result<SourceMetaData, SourceError> {
        if let Some(recycle) = &self.recycle {
            let recycle = Arc::clone(recycle);
            context.set_recycle_fn(move |ctx| recycle(ctx));
        }
        Ok(SourceMetaData::new(self.object_type.clone()))
    }

    fn source_managed_object(&self, user: ManagedObjectUser) {
        user.set_shared_object(Arc::clone(&self.object));
    }
}

impl fmt::Debug for SingletonSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonSource")
            .field("object_type", &self.object_type)
            .finish_non_exhaustive()
    }
}
