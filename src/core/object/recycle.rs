//! Scope teardown: recycling a batch of containers.
//!
//! Containers whose source registered no recycle function are released (and
//! returned to their pool) directly. The others are recycled in container
//! order on a cleanup thread state, one recycle function after another. A
//! failing recycle is recorded as a [`CleanupEscalation`] visible to the
//! remaining recycle functions of the batch; it never stops the batch.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::escalation::{CleanupEscalation, CleanupLog};
use crate::core::function::job::{Continuation, Job};
use crate::core::object::{ManagedObject, ManagedObjectContainer};
use crate::core::state::{ProcessState, ThreadKind};

/// Parameter handed to a recycle function.
pub struct RecycleManagedObjectParameter {
    object: ManagedObject,
    object_name: String,
    object_type: String,
    cleanup: CleanupLog,
}

impl RecycleManagedObjectParameter {
    /// The object being recycled.
    #[must_use]
    pub const fn managed_object(&self) -> &ManagedObject {
        &self.object
    }

    /// Typed access to the object being recycled.
    #[must_use]
    pub fn object<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    /// Name of the object binding.
    #[must_use]
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Object type declared by the source.
    #[must_use]
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Failures recorded so far by earlier recycles of the same batch.
    #[must_use]
    pub fn cleanup_escalations(&self) -> Vec<CleanupEscalation> {
        self.cleanup.lock().clone()
    }
}

impl fmt::Debug for RecycleManagedObjectParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecycleManagedObjectParameter")
            .field("object_name", &self.object_name)
            .field("object_type", &self.object_type)
            .finish_non_exhaustive()
    }
}

pub(crate) struct RecycleBatch;

impl RecycleBatch {
    /// Recycle `containers` on behalf of `process`.
    pub fn start(process: &Arc<ProcessState>, containers: Vec<Arc<ManagedObjectContainer>>) {
        let mut pending = Vec::new();
        for container in containers {
            let Some(object) = container.begin_recycle() else {
                continue;
            };
            let binding = Arc::clone(container.binding());
            match binding.recycle {
                Some(function) => pending.push((function, container, object)),
                None => {
                    if let Some(pool) = &binding.pool {
                        pool.return_managed_object(object);
                    }
                    container.released();
                }
            }
        }
        if pending.is_empty() {
            return;
        }

        let thread = process.create_thread(ThreadKind::Cleanup);
        debug!(
            process_id = %process.id(),
            thread_id = %thread.id(),
            containers = pending.len(),
            "recycling managed objects"
        );
        let log = CleanupLog::default();
        let mut stack = Vec::with_capacity(pending.len() * 2);
        for (function, container, object) in pending.into_iter().rev() {
            let binding = Arc::clone(container.binding());
            let parameter = RecycleManagedObjectParameter {
                object: Arc::clone(&object),
                object_name: binding.name.clone(),
                object_type: binding.object_type.clone(),
                cleanup: Arc::clone(&log),
            };
            let log = Arc::clone(&log);
            let audit_process = Arc::clone(process);
            let thread_id = thread.id();
            stack.push(Continuation::Callback(Box::new(move |outcome| {
                match outcome {
                    None => {
                        if let Some(pool) = &binding.pool {
                            pool.return_managed_object(object);
                        }
                        audit_process.record(thread_id, &binding.name, "recycle", None);
                    }
                    Some(escalation) => {
                        warn!(
                            object = %binding.name,
                            "recycle failed: {}",
                            escalation.message()
                        );
                        if let Some(pool) = &binding.pool {
                            pool.lost_managed_object(object, &escalation);
                        }
                        audit_process.record(
                            thread_id,
                            &binding.name,
                            "recycle",
                            Some(escalation.to_string()),
                        );
                        log.lock().push(CleanupEscalation {
                            object_name: binding.name.clone(),
                            object_type: binding.object_type.clone(),
                            escalation,
                        });
                    }
                }
                container.released();
                Ok(())
            })));
            stack.push(Continuation::Function {
                function,
                parameter: Some(Arc::new(parameter)),
            });
        }
        Job::start_chain(thread, stack);
    }
}
