//! Managed object pool contract.

use std::sync::Arc;

use crate::core::object::{ManagedObject, ManagedObjectSource, ManagedObjectUser};
use crate::core::Escalation;

/// Sits between containers and a source, reusing recycled objects.
///
/// See `infra::pool::BoundedObjectPool` for the bounded implementation.
pub trait ManagedObjectPool: Send + Sync {
    /// Resolve `user` with an idle object, by sourcing a new one from
    /// `source`, or later once capacity frees up.
    fn source_managed_object(&self, user: ManagedObjectUser, source: &Arc<dyn ManagedObjectSource>);

    /// A successfully recycled object is available for reuse.
    fn return_managed_object(&self, object: ManagedObject);

    /// An object whose recycle failed; it must not be reused.
    fn lost_managed_object(&self, object: ManagedObject, cause: &Escalation);

    /// Drop every idle object. Called when the engine closes.
    fn empty(&self);
}
