//! Per-scope holder of one sourced managed object.
//!
//! State machine: `Unsourced -> Sourcing -> Ready -> Recycling -> Released`,
//! or `Sourcing -> Failed`. At most one sourcing is in flight; jobs and
//! callbacks arriving while `Sourcing` wait on it and are released together
//! when the source calls back. The lock is never held while calling into a
//! source, a pool, a job or a callback.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::function::Job;
use crate::core::object::{ManagedObject, ManagedObjectUser, ObjectBinding};
use crate::core::state::ProcessState;
use crate::core::Escalation;

/// Observable state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerStatus {
    /// Never sourced.
    Unsourced,
    /// A sourcing is in flight.
    Sourcing,
    /// The object is available.
    Ready,
    /// Sourcing failed; a fresh `source` call retries.
    Failed,
    /// The recycle function is running.
    Recycling,
    /// Recycled; the container holds nothing.
    Released,
}

type SourceCallback = Box<dyn FnOnce(Result<ManagedObject, Escalation>) + Send>;

enum Waiter {
    Job(Job),
    Callback(SourceCallback),
}

enum State {
    Unsourced,
    Sourcing(Vec<Waiter>),
    Ready(ManagedObject),
    Failed(Escalation),
    Recycling,
    Released,
}

impl State {
    const fn status(&self) -> ContainerStatus {
        match self {
            Self::Unsourced => ContainerStatus::Unsourced,
            Self::Sourcing(_) => ContainerStatus::Sourcing,
            Self::Ready(_) => ContainerStatus::Ready,
            Self::Failed(_) => ContainerStatus::Failed,
            Self::Recycling => ContainerStatus::Recycling,
            Self::Released => ContainerStatus::Released,
        }
    }
}

/// Outcome of a job asking for the container's object.
pub(crate) enum Acquire {
    Ready(Job, ManagedObject),
    /// The job now waits inside the container.
    Parked,
    Failed(Job, Escalation),
}

/// Holds one managed object for a process, thread or function scope.
pub struct ManagedObjectContainer {
    binding: Arc<ObjectBinding>,
    dependencies: Vec<Arc<ManagedObjectContainer>>,
    process: Weak<ProcessState>,
    state: Mutex<State>,
    sourcing_count: AtomicU64,
}

impl ManagedObjectContainer {
    pub(crate) fn new(
        binding: Arc<ObjectBinding>,
        dependencies: Vec<Arc<Self>>,
        process: Weak<ProcessState>,
    ) -> Self {
        Self {
            binding,
            dependencies,
            process,
            state: Mutex::new(State::Unsourced),
            sourcing_count: AtomicU64::new(0),
        }
    }

    /// Name of the object binding.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.binding.name
    }

    /// Current state.
    #[must_use]
    pub fn status(&self) -> ContainerStatus {
        self.state.lock().status()
    }

    /// Number of times the source was asked for an object.
    #[must_use]
    pub fn sourcing_count(&self) -> u64 {
        self.sourcing_count.load(Ordering::Acquire)
    }

    /// The object if the container is `Ready`.
    #[must_use]
    pub fn get_if_ready(&self) -> Option<ManagedObject> {
        match &*self.state.lock() {
            State::Ready(object) => Some(Arc::clone(object)),
            _ => None,
        }
    }

    /// Obtain the object, sourcing it if necessary.
    ///
    /// `callback` runs exactly once: immediately if the object is ready,
    /// otherwise when the pending (or newly started) sourcing resolves. A
    /// `Failed` container starts a fresh sourcing.
    pub fn source<F>(self: &Arc<Self>, callback: F)
    where
        F: FnOnce(Result<ManagedObject, Escalation>) + Send + 'static,
    {
        let mut state = self.state.lock();
        match &mut *state {
            State::Ready(object) => {
                let object = Arc::clone(object);
                drop(state);
                callback(Ok(object));
            }
            State::Sourcing(waiters) => waiters.push(Waiter::Callback(Box::new(callback))),
            State::Unsourced | State::Failed(_) => {
                *state = State::Sourcing(vec![Waiter::Callback(Box::new(callback))]);
                drop(state);
                self.begin_sourcing();
            }
            State::Recycling | State::Released => {
                drop(state);
                callback(Err(self.released_escalation()));
            }
        }
    }

    /// Job-side access: a job meeting a pending sourcing is parked here and
    /// re-assigned to its team when the sourcing resolves.
    pub(crate) fn acquire(self: &Arc<Self>, job: Job) -> Acquire {
        let mut state = self.state.lock();
        match &mut *state {
            State::Ready(object) => Acquire::Ready(job, Arc::clone(object)),
            State::Failed(escalation) => Acquire::Failed(job, escalation.clone()),
            State::Sourcing(waiters) => {
                debug!(object = %self.binding.name, job_id = job.id(), "job parked on sourcing");
                waiters.push(Waiter::Job(job));
                Acquire::Parked
            }
            State::Unsourced => {
                debug!(object = %self.binding.name, job_id = job.id(), "job parked on new sourcing");
                *state = State::Sourcing(vec![Waiter::Job(job)]);
                drop(state);
                self.begin_sourcing();
                Acquire::Parked
            }
            State::Recycling | State::Released => {
                drop(state);
                Acquire::Failed(job, self.released_escalation())
            }
        }
    }

    /// Ask the source (or pool) for the object once every dependency is ready.
    fn begin_sourcing(self: &Arc<Self>) {
        let mut dependencies = Vec::with_capacity(self.dependencies.len());
        for dependency in &self.dependencies {
            if let Some(object) = dependency.get_if_ready() {
                dependencies.push(object);
                continue;
            }
            let this = Arc::clone(self);
            dependency.source(move |outcome| match outcome {
                Ok(_) => this.begin_sourcing(),
                Err(escalation) => this.sourced(Err(escalation)),
            });
            return;
        }

        self.sourcing_count.fetch_add(1, Ordering::AcqRel);
        let user = ManagedObjectUser::new(Arc::clone(self), dependencies);
        let binding = Arc::clone(&self.binding);
        let call = {
            let user = user.clone();
            panic::catch_unwind(AssertUnwindSafe(move || match &binding.pool {
                Some(pool) => pool.source_managed_object(user, &binding.source),
                None => binding.source.source_managed_object(user),
            }))
        };
        if let Err(payload) = call {
            let escalation = Escalation::panicked(&self.binding.name, payload.as_ref());
            if !user.is_resolved() {
                user.fail(escalation);
            }
        }
    }

    /// Resolve the pending sourcing; called once per sourcing by the user.
    pub(crate) fn sourced(&self, outcome: Result<ManagedObject, Escalation>) {
        let waiters = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Sourcing(waiters) => {
                    let waiters = std::mem::take(waiters);
                    *state = match &outcome {
                        Ok(object) => State::Ready(Arc::clone(object)),
                        Err(escalation) => State::Failed(escalation.clone()),
                    };
                    waiters
                }
                State::Recycling | State::Released => {
                    drop(state);
                    self.discard_late(outcome);
                    return;
                }
                other => {
                    warn!(
                        object = %self.binding.name,
                        status = ?other.status(),
                        "sourcing result arrived without a pending sourcing"
                    );
                    return;
                }
            }
        };

        match &outcome {
            Ok(_) => debug!(object = %self.binding.name, waiters = waiters.len(), "object ready"),
            Err(escalation) => warn!(
                object = %self.binding.name,
                waiters = waiters.len(),
                "sourcing failed: {}",
                escalation.message()
            ),
        }
        for waiter in waiters {
            match waiter {
                Waiter::Job(job) => job.resume(),
                Waiter::Callback(callback) => callback(outcome.clone()),
            }
        }
    }

    /// Enter recycling, returning the object if there is one to recycle.
    ///
    /// A container still sourcing is released immediately; its waiters are
    /// abandoned and a late object is handed back to the pool.
    pub(crate) fn begin_recycle(&self) -> Option<ManagedObject> {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, State::Released);
        match previous {
            State::Ready(object) => {
                *state = State::Recycling;
                Some(object)
            }
            State::Sourcing(waiters) => {
                drop(state);
                let escalation = self.released_escalation();
                for waiter in waiters {
                    match waiter {
                        Waiter::Job(job) => job.abandon(escalation.clone()),
                        Waiter::Callback(callback) => callback(Err(escalation.clone())),
                    }
                }
                None
            }
            _ => None,
        }
    }

    pub(crate) fn released(&self) {
        *self.state.lock() = State::Released;
    }

    pub(crate) const fn binding(&self) -> &Arc<ObjectBinding> {
        &self.binding
    }

    pub(crate) fn process(&self) -> Option<Arc<ProcessState>> {
        self.process.upgrade()
    }

    fn discard_late(&self, outcome: Result<ManagedObject, Escalation>) {
        debug!(object = %self.binding.name, "discarding object sourced after release");
        if let (Ok(object), Some(pool)) = (outcome, &self.binding.pool) {
            pool.return_managed_object(object);
        }
    }

    fn released_escalation(&self) -> Escalation {
        Escalation::abandoned(format!("container `{}` was released", self.binding.name))
    }
}

impl fmt::Debug for ManagedObjectContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObjectContainer")
            .field("name", &self.binding.name)
            .field("status", &self.status())
            .field("sourcing_count", &self.sourcing_count())
            .finish()
    }
}
