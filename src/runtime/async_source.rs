//! Adapter running an async factory behind the callback sourcing contract.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::core::{
    ManagedObjectSource, ManagedObjectUser, SourceContext, SourceError, SourceMetaData,
    SourceSpecification, Spawn,
};

/// Creates objects asynchronously.
#[async_trait]
pub trait AsyncObjectFactory: Send + Sync + 'static {
    /// Object produced by the factory.
    type Object: Any + Send + Sync;

    /// Create one object. Dependencies are available through `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be created.
    async fn create(&self, user: &ManagedObjectUser) -> Result<Self::Object, SourceError>;
}

/// Sources objects by spawning [`AsyncObjectFactory::create`] on `S`.
///
/// A task that panics or is cancelled before resolving fails the sourcing,
/// so parked jobs are never left waiting.
pub struct AsyncManagedObjectSource<F, S> {
    object_type: String,
    dependency_keys: Vec<String>,
    factory: Arc<F>,
    spawner: S,
}

impl<F, S> AsyncManagedObjectSource<F, S>
where
    F: AsyncObjectFactory,
    S: Spawn + Send + Sync,
{
    /// Source `object_type` objects from `factory`, spawning on `spawner`.
    pub fn new(object_type: impl Into<String>, factory: F, spawner: S) -> Self {
        Self {
            object_type: object_type.into(),
            dependency_keys: Vec::new(),
            factory: Arc::new(factory),
            spawner,
        }
    }

    /// Declare a dependency key.
    #[must_use]
    pub fn with_dependency(mut self, key: impl Into<String>) -> Self {
        self.dependency_keys.push(key.into());
        self
    }
}

struct ResolveGuard(ManagedObjectUser);

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        if !self.0.is_resolved() {
            warn!(object = self.0.object_name(), "async sourcing ended without resolving");
            self.0
                .on_failure(SourceError::Failed("async sourcing did not complete".to_string()));
        }
    }
}

impl<F, S> ManagedObjectSource for AsyncManagedObjectSource<F, S>
where
    F: AsyncObjectFactory,
    S: Spawn + Send + Sync,
{
    fn specification(&self) -> SourceSpecification {
        SourceSpecification::new()
    }

    fn init(&mut self, _context: &mut SourceContext) -> Result<SourceMetaData, SourceError> {
        Ok(self
            .dependency_keys
            .iter()
            .fold(SourceMetaData::new(self.object_type.clone()), |meta, key| {
                meta.with_dependency(key.clone())
            }))
    }

    fn source_managed_object(&self, user: ManagedObjectUser) {
        let factory = Arc::clone(&self.factory);
        self.spawner.spawn(async move {
            let guard = ResolveGuard(user);
            match factory.create(&guard.0).await {
                Ok(object) => guard.0.set_managed_object(object),
                Err(e) => guard.0.on_failure(e),
            }
        });
    }
}

impl<F, S> fmt::Debug for AsyncManagedObjectSource<F, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncManagedObjectSource")
            .field("object_type", &self.object_type)
            .field("dependency_keys", &self.dependency_keys)
            .finish_non_exhaustive()
    }
}
