//! The callback handle a source resolves a sourcing through.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::core::object::{ManagedObject, ManagedObjectContainer};
use crate::core::{Escalation, SourceError};

type FailureListener = Box<dyn FnOnce() + Send>;

struct UserInner {
    container: Arc<ManagedObjectContainer>,
    dependencies: Vec<ManagedObject>,
    resolved: AtomicBool,
    failure_listeners: Mutex<Vec<FailureListener>>,
}

/// Receives the outcome of one sourcing.
///
/// Cloneable and `Send`: a source may keep it and resolve from any thread.
/// Exactly one of [`set_managed_object`](Self::set_managed_object) or
/// [`on_failure`](Self::on_failure) may be called; a second call is a
/// contract violation escalated against the owning process.
#[derive(Clone)]
pub struct ManagedObjectUser {
    inner: Arc<UserInner>,
}

impl ManagedObjectUser {
    pub(crate) fn new(container: Arc<ManagedObjectContainer>, dependencies: Vec<ManagedObject>) -> Self {
        Self {
            inner: Arc::new(UserInner {
                container,
                dependencies,
                resolved: AtomicBool::new(false),
                failure_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Name of the object binding being sourced.
    #[must_use]
    pub fn object_name(&self) -> &str {
        self.inner.container.name()
    }

    /// The `index`-th dependency, in the source's declared key order.
    #[must_use]
    pub fn dependency_object(&self, index: usize) -> Option<&ManagedObject> {
        self.inner.dependencies.get(index)
    }

    /// Typed access to the `index`-th dependency.
    #[must_use]
    pub fn dependency<T: Any + Send + Sync>(&self, index: usize) -> Option<&T> {
        self.inner.dependencies.get(index)?.downcast_ref::<T>()
    }

    /// Whether the sourcing has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.load(Ordering::Acquire)
    }

    /// Resolve with a new object.
    pub fn set_managed_object<T: Any + Send + Sync>(&self, object: T) {
        self.set_shared_object(Arc::new(object));
    }

    /// Resolve with an already shared object (e.g. an idle pooled instance).
    pub fn set_shared_object(&self, object: ManagedObject) {
        self.complete(Ok(object));
    }

    /// Resolve with a failure.
    pub fn on_failure(&self, error: SourceError) {
        let escalation = Escalation::sourcing(self.object_name(), &error);
        self.complete(Err(escalation));
    }

    /// Run `listener` if this sourcing fails. Pools use it to release the
    /// capacity they reserved for the user.
    pub fn add_failure_listener<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.failure_listeners.lock().push(Box::new(listener));
    }

    pub(crate) fn fail(&self, escalation: Escalation) {
        self.complete(Err(escalation));
    }

    fn complete(&self, outcome: Result<ManagedObject, Escalation>) {
        if self.inner.resolved.swap(true, Ordering::AcqRel) {
            let violation = Escalation::contract_violation(format!(
                "source for `{}` resolved a sourcing more than once",
                self.object_name()
            ));
            error!(object = self.object_name(), "{}", violation.message());
            if let Some(process) = self.inner.container.process() {
                process.escalate_detached(violation);
            }
            return;
        }
        if outcome.is_err() {
            let listeners = std::mem::take(&mut *self.inner.failure_listeners.lock());
            for listener in listeners {
                listener();
            }
        }
        self.inner.container.sourced(outcome);
    }
}

impl fmt::Debug for ManagedObjectUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObjectUser")
            .field("object", &self.object_name())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
