//! Logical threads of control within a process.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::object::{ManagedObjectContainer, ObjectBinding, RecycleBatch};
use crate::core::state::ProcessState;
use crate::core::synchroniser::ThreadSynchronisers;
use crate::util::ThreadStateId;

/// Lifecycle of a thread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadStatus {
    /// The root chain is running.
    Active,
    /// The root chain finished; parallel chains are still running.
    AwaitingChildren,
    /// Every chain finished and teardown has started.
    Complete,
}

/// Purpose of a thread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    /// Runs flows of the process.
    Flow,
    /// Runs recycle functions; keeps running after the process is torn down.
    Cleanup,
}

/// A logical, possibly thread-hopping, sequential execution context.
pub struct ThreadState {
    id: ThreadStateId,
    kind: ThreadKind,
    process: Arc<ProcessState>,
    containers: Box<[OnceLock<Arc<ManagedObjectContainer>>]>,
    synchronisers: ThreadSynchronisers,
    active_chains: AtomicUsize,
    status: Mutex<ThreadStatus>,
}

impl ThreadState {
    pub(crate) fn new(
        id: ThreadStateId,
        kind: ThreadKind,
        process: Arc<ProcessState>,
        binding_count: usize,
        synchronisers: ThreadSynchronisers,
    ) -> Self {
        Self {
            id,
            kind,
            process,
            containers: (0..binding_count).map(|_| OnceLock::new()).collect(),
            synchronisers,
            active_chains: AtomicUsize::new(1),
            status: Mutex::new(ThreadStatus::Active),
        }
    }

    /// Identifier within the process.
    #[must_use]
    pub const fn id(&self) -> ThreadStateId {
        self.id
    }

    /// Purpose of this thread state.
    #[must_use]
    pub const fn kind(&self) -> ThreadKind {
        self.kind
    }

    /// Owning process.
    #[must_use]
    pub const fn process(&self) -> &Arc<ProcessState> {
        &self.process
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ThreadStatus {
        *self.status.lock()
    }

    /// Chains still running on this thread state.
    #[must_use]
    pub fn active_chains(&self) -> usize {
        self.active_chains.load(Ordering::Acquire)
    }

    pub(crate) const fn is_cleanup(&self) -> bool {
        matches!(self.kind, ThreadKind::Cleanup)
    }

    pub(crate) const fn synchronisers(&self) -> &ThreadSynchronisers {
        &self.synchronisers
    }

    pub(crate) fn existing_container(&self, binding: usize) -> Option<Arc<ManagedObjectContainer>> {
        self.containers.get(binding)?.get().cloned()
    }

    /// The thread-scoped container for `binding`, created on first use.
    pub(crate) fn container(
        &self,
        binding: &Arc<ObjectBinding>,
        dependencies: Vec<Arc<ManagedObjectContainer>>,
    ) -> Arc<ManagedObjectContainer> {
        Arc::clone(self.containers[binding.index].get_or_init(|| {
            Arc::new(ManagedObjectContainer::new(
                Arc::clone(binding),
                dependencies,
                Arc::downgrade(&self.process),
            ))
        }))
    }

    /// A parallel chain was started on this thread state.
    pub(crate) fn begin_chain(&self) {
        self.active_chains.fetch_add(1, Ordering::AcqRel);
    }

    /// A chain ended. The last chain completes the thread state, recycles its
    /// containers and reports to the process.
    pub(crate) fn chain_complete(self: &Arc<Self>, root: bool) {
        let Ok(previous) = self
            .active_chains
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |chains| chains.checked_sub(1))
        else {
            warn!(thread_id = %self.id, "chain completed on a thread state with no active chains");
            return;
        };
        let remaining = previous - 1;
        if remaining > 0 {
            if root {
                *self.status.lock() = ThreadStatus::AwaitingChildren;
                debug!(thread_id = %self.id, remaining, "root chain done, awaiting parallel chains");
            }
            return;
        }

        *self.status.lock() = ThreadStatus::Complete;
        debug!(process_id = %self.process.id(), thread_id = %self.id, "thread state complete");
        let containers = self
            .containers
            .iter()
            .filter_map(|slot| slot.get().cloned())
            .collect();
        RecycleBatch::start(&self.process, containers);
        self.process.thread_complete();
    }
}

impl fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadState")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("process", &self.process.id())
            .field("status", &self.status())
            .field("active_chains", &self.active_chains())
            .finish()
    }
}
