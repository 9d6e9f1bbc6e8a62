//! The root execution context of one external trigger.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::core::engine::{EngineCore, ProcessOutcome};
use crate::core::object::{ManagedObjectContainer, ObjectBinding, RecycleBatch};
use crate::core::state::{ThreadKind, ThreadState};
use crate::core::{Escalation, EscalationHandler};
use crate::util::{ProcessId, ThreadStateId};

/// Lifecycle of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessPhase {
    /// Flow thread states are running.
    Running,
    /// Every flow thread finished; process-scoped objects are being recycled.
    CleaningUp,
    /// Everything finished.
    Complete,
}

pub(crate) type CompletionCallback = Box<dyn FnOnce(&ProcessOutcome) + Send>;

/// Root context: owns process-scoped containers, the process escalation
/// handler and the count of outstanding thread states.
pub struct ProcessState {
    id: ProcessId,
    core: Arc<EngineCore>,
    containers: Box<[OnceLock<Arc<ManagedObjectContainer>>]>,
    handler: Option<Arc<dyn EscalationHandler>>,
    active_threads: AtomicUsize,
    next_thread: AtomicU64,
    phase: Mutex<ProcessPhase>,
    torn_down: AtomicBool,
    escalation: Mutex<Option<Escalation>>,
    outcome: Mutex<Option<ProcessOutcome>>,
    completed: Condvar,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl ProcessState {
    pub(crate) fn new(
        core: Arc<EngineCore>,
        handler: Option<Arc<dyn EscalationHandler>>,
        on_complete: Option<CompletionCallback>,
    ) -> Self {
        let binding_count = core.binding_count();
        Self {
            id: ProcessId::new(),
            core,
            containers: (0..binding_count).map(|_| OnceLock::new()).collect(),
            handler,
            active_threads: AtomicUsize::new(0),
            next_thread: AtomicU64::new(0),
            phase: Mutex::new(ProcessPhase::Running),
            torn_down: AtomicBool::new(false),
            escalation: Mutex::new(None),
            outcome: Mutex::new(None),
            completed: Condvar::new(),
            on_complete: Mutex::new(on_complete),
        }
    }

    /// Process identifier.
    #[must_use]
    pub const fn id(&self) -> ProcessId {
        self.id
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ProcessPhase {
        *self.phase.lock()
    }

    /// Thread states not yet complete.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.active_threads.load(Ordering::Acquire)
    }

    /// Whether an unhandled escalation tore the process down.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub(crate) const fn core(&self) -> &Arc<EngineCore> {
        &self.core
    }

    /// Register a new thread state with this process.
    pub(crate) fn create_thread(self: &Arc<Self>, kind: ThreadKind) -> Arc<ThreadState> {
        self.active_threads.fetch_add(1, Ordering::AcqRel);
        let id = ThreadStateId(self.next_thread.fetch_add(1, Ordering::Relaxed));
        Arc::new(ThreadState::new(
            id,
            kind,
            Arc::clone(self),
            self.containers.len(),
            self.core.synchronisers().create_for_thread(),
        ))
    }

    pub(crate) fn existing_container(&self, binding: usize) -> Option<Arc<ManagedObjectContainer>> {
        self.containers.get(binding)?.get().cloned()
    }

    /// The process-scoped container for `binding`, created on first use.
    pub(crate) fn container(
        self: &Arc<Self>,
        binding: &Arc<ObjectBinding>,
        dependencies: Vec<Arc<ManagedObjectContainer>>,
    ) -> Arc<ManagedObjectContainer> {
        Arc::clone(self.containers[binding.index].get_or_init(|| {
            Arc::new(ManagedObjectContainer::new(
                Arc::clone(binding),
                dependencies,
                Arc::downgrade(self),
            ))
        }))
    }

    /// Record an audit event for this process, if a sink is attached.
    pub(crate) fn record(
        &self,
        thread: ThreadStateId,
        function: &str,
        action: &str,
        payload: Option<String>,
    ) {
        self.core.record(self.id, thread, function, action, payload);
    }

    /// Walk an escalation no chain handled: the process handler, then the
    /// terminal handler, which tears the process down.
    pub(crate) fn escalation_unhandled(&self, thread: Option<ThreadStateId>, escalation: Escalation) {
        let thread = thread.unwrap_or(ThreadStateId(u64::MAX));
        let handler = self.handler.clone().or_else(|| self.core.process_handler());
        let unhandled = match handler {
            Some(handler) => {
                match panic::catch_unwind(AssertUnwindSafe(|| handler.handle_escalation(&escalation))) {
                    Ok(Ok(())) => {
                        debug!(process_id = %self.id, label = escalation.label(), "escalation handled by process handler");
                        self.record(thread, escalation.label(), "escalate", Some("handled".into()));
                        None
                    }
                    Ok(Err(passed_on)) => Some(passed_on),
                    Err(payload) => Some(Escalation::panicked("process escalation handler", payload.as_ref())),
                }
            }
            None => Some(escalation),
        };

        if let Some(escalation) = unhandled {
            self.core.terminal().escalation_unhandled(self.id, &escalation);
            self.record(thread, escalation.label(), "escalate", Some(escalation.to_string()));
            self.escalation.lock().get_or_insert(escalation);
            self.tear_down();
        }
    }

    /// Escalate outside of any chain (contract violations, rejected jobs).
    pub(crate) fn escalate_detached(&self, escalation: Escalation) {
        self.escalation_unhandled(None, escalation);
    }

    fn tear_down(&self) {
        if !self.torn_down.swap(true, Ordering::AcqRel) {
            warn!(process_id = %self.id, "process torn down; outstanding jobs will be abandoned");
        }
    }

    /// A thread state completed. The last flow thread starts recycling the
    /// process-scoped containers; the last thread overall completes the
    /// process.
    pub(crate) fn thread_complete(self: &Arc<Self>) {
        if self.active_threads.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let start_cleanup = {
            let mut phase = self.phase.lock();
            match *phase {
                ProcessPhase::Running => {
                    *phase = ProcessPhase::CleaningUp;
                    true
                }
                ProcessPhase::CleaningUp => {
                    *phase = ProcessPhase::Complete;
                    false
                }
                ProcessPhase::Complete => return,
            }
        };

        if start_cleanup {
            // Hold the count open while the batch registers its cleanup thread.
            self.active_threads.fetch_add(1, Ordering::AcqRel);
            let containers = self
                .containers
                .iter()
                .filter_map(|slot| slot.get().cloned())
                .collect();
            RecycleBatch::start(self, containers);
            self.thread_complete();
        } else {
            self.finish();
        }
    }

    fn finish(&self) {
        let outcome = self
            .escalation
            .lock()
            .take()
            .map_or(ProcessOutcome::Completed, ProcessOutcome::Escalated);
        info!(process_id = %self.id, outcome = ?outcome, "process complete");
        self.record(ThreadStateId(0), "", "process_complete", None);

        let callback = self.on_complete.lock().take();
        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&outcome))).is_err() {
                warn!(process_id = %self.id, "process completion callback panicked");
            }
        }

        self.core.process_finished();
        *self.outcome.lock() = Some(outcome);
        self.completed.notify_all();
    }

    pub(crate) fn try_outcome(&self) -> Option<ProcessOutcome> {
        self.outcome.lock().clone()
    }

    pub(crate) fn wait(&self, timeout: Duration) -> Option<ProcessOutcome> {
        let mut outcome = self.outcome.lock();
        if outcome.is_none() {
            let _ = self.completed.wait_while_for(&mut outcome, |o| o.is_none(), timeout);
        }
        outcome.clone()
    }
}

impl fmt::Debug for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessState")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("active_threads", &self.active_threads())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
