//! Bounded managed object pool.
//!
//! Objects come from the idle list first; otherwise a new object is sourced
//! if capacity can be reserved; otherwise the user is parked until an object
//! is returned or capacity is released. Capacity is reserved with a
//! compare-and-swap on the live object count, so sourcing never happens
//! under a lock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::{Escalation, ManagedObject, ManagedObjectPool, ManagedObjectSource, ManagedObjectUser};

/// Statistics about pool utilisation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPoolStats {
    /// Maximum live objects.
    pub max_objects: usize,
    /// Live objects: in use, idle, or being sourced.
    pub live_objects: usize,
    /// Idle objects ready for reuse.
    pub idle_objects: usize,
    /// Users parked waiting for capacity.
    pub waiting_users: usize,
    /// Objects requested from the source.
    pub sourced: u64,
    /// Users served from the idle list.
    pub reused: u64,
    /// Objects reported lost.
    pub lost: u64,
}

type Waiting = (ManagedObjectUser, Arc<dyn ManagedObjectSource>);

struct PoolInner {
    name: String,
    max_objects: usize,
    live: AtomicUsize,
    idle: Mutex<Vec<ManagedObject>>,
    waiting: Mutex<VecDeque<Waiting>>,
    sourced: AtomicU64,
    reused: AtomicU64,
    lost: AtomicU64,
}

impl PoolInner {
    fn try_reserve(&self) -> bool {
        let mut current = self.live.load(Ordering::Acquire);
        loop {
            if current >= self.max_objects {
                return false;
            }
            match self.live.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release(self: &Arc<Self>) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.serve_waiting();
    }

    fn source_new(self: &Arc<Self>, user: ManagedObjectUser, source: &Arc<dyn ManagedObjectSource>) {
        self.sourced.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(self);
        user.add_failure_listener(move || inner.release());
        source.source_managed_object(user);
    }

    /// Serve parked users while idle objects or capacity are available.
    fn serve_waiting(self: &Arc<Self>) {
        loop {
            let mut waiting = self.waiting.lock();
            if waiting.is_empty() {
                return;
            }
            let idle = self.idle.lock().pop();
            if let Some(object) = idle {
                let Some((user, _)) = waiting.pop_front() else {
                    self.idle.lock().push(object);
                    return;
                };
                drop(waiting);
                self.reused.fetch_add(1, Ordering::Relaxed);
                user.set_shared_object(object);
            } else if self.try_reserve() {
                let Some((user, source)) = waiting.pop_front() else {
                    self.live.fetch_sub(1, Ordering::AcqRel);
                    return;
                };
                drop(waiting);
                self.source_new(user, &source);
            } else {
                return;
            }
        }
    }
}

/// Pool holding at most `max_objects` live objects.
#[derive(Clone)]
pub struct BoundedObjectPool {
    inner: Arc<PoolInner>,
}

impl BoundedObjectPool {
    /// Create a pool. `max_objects` of 0 is raised to 1.
    pub fn new(name: impl Into<String>, max_objects: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                max_objects: max_objects.max(1),
                live: AtomicUsize::new(0),
                idle: Mutex::new(Vec::new()),
                waiting: Mutex::new(VecDeque::new()),
                sourced: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                lost: AtomicU64::new(0),
            }),
        }
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ObjectPoolStats {
        ObjectPoolStats {
            max_objects: self.inner.max_objects,
            live_objects: self.inner.live.load(Ordering::Acquire),
            idle_objects: self.inner.idle.lock().len(),
            waiting_users: self.inner.waiting.lock().len(),
            sourced: self.inner.sourced.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            lost: self.inner.lost.load(Ordering::Relaxed),
        }
    }
}

impl ManagedObjectPool for BoundedObjectPool {
    fn source_managed_object(&self, user: ManagedObjectUser, source: &Arc<dyn ManagedObjectSource>) {
        let idle = self.inner.idle.lock().pop();
        if let Some(object) = idle {
            self.inner.reused.fetch_add(1, Ordering::Relaxed);
            user.set_shared_object(object);
            return;
        }
        if self.inner.try_reserve() {
            self.inner.source_new(user, source);
            return;
        }
        debug!(pool = %self.inner.name, object = user.object_name(), "pool exhausted, parking user");
        self.inner.waiting.lock().push_back((user, Arc::clone(source)));
        // An object may have come back between the checks and the push.
        self.inner.serve_waiting();
    }

    fn return_managed_object(&self, object: ManagedObject) {
        self.inner.idle.lock().push(object);
        self.inner.serve_waiting();
    }

    fn lost_managed_object(&self, object: ManagedObject, cause: &Escalation) {
        drop(object);
        self.inner.lost.fetch_add(1, Ordering::Relaxed);
        warn!(pool = %self.inner.name, "pooled object lost: {}", cause.message());
        self.inner.release();
    }

    fn empty(&self) {
        let drained: Vec<_> = self.inner.idle.lock().drain(..).collect();
        self.inner.live.fetch_sub(drained.len(), Ordering::AcqRel);
        debug!(pool = %self.inner.name, emptied = drained.len(), "pool emptied");
    }
}

impl fmt::Debug for BoundedObjectPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedObjectPool")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}
