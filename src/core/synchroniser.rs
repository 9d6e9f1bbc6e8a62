//! Thread synchronisers carry thread-affine state across team threads.
//!
//! A `ThreadState` may be serviced by different OS threads over its life.
//! Each registered [`ThreadSynchroniserFactory`] produces one
//! [`ThreadSynchroniser`] per `ThreadState`; before a job body runs the
//! synchronisers are resumed, immediately after it they are suspended. Both
//! passes run in registration order.
//!
//! While a [`SynchronisedSection`] is open no other chain of the same
//! `ThreadState` can resume, so parallel chains run their bodies one at a
//! time and each sees the state the previous one suspended.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Captures and restores thread-affine state for one `ThreadState`.
pub trait ThreadSynchroniser: Send {
    /// Capture and clear the OS thread's state as the logical thread leaves it.
    fn suspend_thread(&mut self);

    /// Restore the captured state onto the current OS thread.
    fn resume_thread(&mut self);
}

/// Produces a synchroniser for each new `ThreadState`.
pub trait ThreadSynchroniserFactory: Send + Sync {
    /// Create the synchroniser for a new logical thread.
    fn create_thread_synchroniser(&self) -> Box<dyn ThreadSynchroniser>;
}

impl<F> ThreadSynchroniserFactory for F
where
    F: Fn() -> Box<dyn ThreadSynchroniser> + Send + Sync,
{
    fn create_thread_synchroniser(&self) -> Box<dyn ThreadSynchroniser> {
        self()
    }
}

/// Ordered set of synchroniser factories registered with the engine.
#[derive(Clone, Default)]
pub struct ThreadSynchroniserRegistry {
    factories: Vec<Arc<dyn ThreadSynchroniserFactory>>,
}

impl ThreadSynchroniserRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a factory; registration order is the suspend/resume order.
    pub fn register(&mut self, factory: Arc<dyn ThreadSynchroniserFactory>) {
        self.factories.push(factory);
    }

    /// Number of registered factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no factories are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Instantiate one synchroniser per factory for a new thread state.
    #[must_use]
    pub fn create_for_thread(&self) -> ThreadSynchronisers {
        ThreadSynchronisers {
            synchronisers: ReentrantMutex::new(RefCell::new(
                self.factories
                    .iter()
                    .map(|f| f.create_thread_synchroniser())
                    .collect(),
            )),
        }
    }
}

type Synchronisers = RefCell<Vec<Box<dyn ThreadSynchroniser>>>;

/// The synchronisers owned by one `ThreadState`.
///
/// The lock is reentrant: a passive team may run a continuation of the same
/// `ThreadState` from inside a body on the same OS thread.
pub struct ThreadSynchronisers {
    synchronisers: ReentrantMutex<Synchronisers>,
}

impl ThreadSynchronisers {
    /// Resume all synchronisers in registration order and hold them until
    /// the returned section is suspended.
    ///
    /// Without registered synchronisers no lock is taken.
    pub fn resume(&self) -> SynchronisedSection<'_> {
        let guard = self.synchronisers.lock();
        if guard.borrow().is_empty() {
            return SynchronisedSection { guard: None };
        }
        for synchroniser in guard.borrow_mut().iter_mut() {
            synchroniser.resume_thread();
        }
        SynchronisedSection { guard: Some(guard) }
    }
}

/// Synchronisers resumed for one body; [`suspend`](Self::suspend) releases them.
#[must_use = "a section must be suspended to capture the thread's state"]
pub struct SynchronisedSection<'a> {
    guard: Option<ReentrantMutexGuard<'a, Synchronisers>>,
}

impl SynchronisedSection<'_> {
    /// Suspend all synchronisers in registration order.
    pub fn suspend(self) {
        if let Some(guard) = &self.guard {
            for synchroniser in guard.borrow_mut().iter_mut() {
                synchroniser.suspend_thread();
            }
        }
    }
}
