//! Team abstraction: a named worker pool that accepts jobs.
//!
//! Teams are polymorphic over a single capability, accept-and-run a
//! [`Job`]. Concrete teams live in `infra::team` (and `runtime` for tokio).
//! They all hand jobs to [`execute_job`], which keeps the shared counters
//! and guarantees a panic never takes a worker thread down.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::core::function::Job;
use crate::core::Escalation;

/// Errors that can occur when assigning work to a team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamError {
    /// The team's queue is full; no more jobs can be accepted.
    QueueFull,

    /// The team has stopped working.
    Stopped,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (thread spawn failure, channel closed, etc.).
    Internal(String),
}

impl fmt::Display for TeamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "team queue is full"),
            Self::Stopped => write!(f, "team has stopped working"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for TeamError {}

/// A job the team refused, handed back to the caller.
pub struct JobRejected {
    /// The refused job.
    pub job: Job,
    /// Why it was refused.
    pub reason: TeamError,
}

impl fmt::Debug for JobRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRejected")
            .field("job", &self.job.id())
            .field("reason", &self.reason)
            .finish()
    }
}

/// What a stopping team does with jobs still queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Run queued jobs before the workers exit.
    #[default]
    Drain,
    /// Abandon queued jobs; their chains are terminated.
    Abandon,
}

/// A named worker pool.
pub trait Team: Send + Sync {
    /// Team name.
    fn name(&self) -> &str;

    /// Make the team available for jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if worker threads cannot be created.
    fn start_working(&self) -> Result<(), TeamError>;

    /// Hand a job to the team. Must not block the caller.
    ///
    /// # Errors
    ///
    /// Returns the job if the team cannot accept it.
    fn assign_job(&self, job: Job) -> Result<(), JobRejected>;

    /// Stop accepting jobs and wait for in-flight jobs. Idempotent.
    fn stop_working(&self);

    /// Current counters.
    fn stats(&self) -> TeamStats;
}

/// Statistics about team utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamStats {
    /// Number of worker threads (0 for teams borrowing the caller's thread).
    pub worker_count: usize,

    /// Jobs accepted by `assign_job`.
    pub assigned_jobs: u64,

    /// Jobs currently executing.
    pub active_jobs: u64,

    /// Jobs that ran to the end of their step.
    pub completed_jobs: u64,

    /// Jobs whose execution escaped with a panic.
    pub panicked_jobs: u64,

    /// Jobs refused by `assign_job`.
    pub rejected_jobs: u64,

    /// Jobs abandoned while stopping.
    pub abandoned_jobs: u64,
}

/// Internal counters for team statistics (thread-safe).
#[derive(Debug, Default)]
pub struct TeamCounters {
    assigned: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    rejected: AtomicU64,
    abandoned: AtomicU64,
    idle: Mutex<()>,
    idle_signal: Condvar,
}

impl TeamCounters {
    /// Count an accepted job.
    pub fn job_assigned(&self) {
        self.assigned.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a refused job.
    pub fn job_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an abandoned job.
    pub fn job_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics.
    #[must_use]
    pub fn snapshot(&self, worker_count: usize) -> TeamStats {
        TeamStats {
            worker_count,
            assigned_jobs: self.assigned.load(Ordering::Relaxed),
            active_jobs: self.active.load(Ordering::Relaxed),
            completed_jobs: self.completed.load(Ordering::Relaxed),
            panicked_jobs: self.panicked.load(Ordering::Relaxed),
            rejected_jobs: self.rejected.load(Ordering::Relaxed),
            abandoned_jobs: self.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Block until no job is executing or the timeout elapses.
    ///
    /// Returns `true` if the team went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut guard = self.idle.lock();
        while self.active.load(Ordering::Acquire) > 0 {
            if self.idle_signal.wait_for(&mut guard, timeout).timed_out() {
                return self.active.load(Ordering::Acquire) == 0;
            }
        }
        true
    }

    fn begin(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    fn end(&self, panicked: bool) {
        if panicked {
            self.panicked.fetch_add(1, Ordering::Relaxed);
        } else {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
        self.leave();
    }

    fn leave(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.idle.lock();
            self.idle_signal.notify_all();
        }
    }

    /// Count a job as active before it reaches the thread that will run it.
    ///
    /// Pair with [`execute_reserved_job`] or [`cancel_reservation`](Self::cancel_reservation).
    pub fn reserve(&self) {
        self.begin();
    }

    /// Release a reservation whose job never ran.
    pub fn cancel_reservation(&self) {
        self.leave();
    }
}

/// Run a job on the current thread on behalf of a team.
///
/// Function bodies, synchronisers, administration duties and callbacks are
/// guarded inside the job. A panic reaching this point is an engine fault:
/// it escalates against the job's process and ends the job's chain so the
/// process can still complete.
pub fn execute_job(job: Job, counters: &TeamCounters) {
    counters.begin();
    run_counted(job, counters);
}

/// Run a job whose slot was taken with [`TeamCounters::reserve`].
pub fn execute_reserved_job(job: Job, counters: &TeamCounters) {
    run_counted(job, counters);
}

fn run_counted(job: Job, counters: &TeamCounters) {
    let job_id = job.id();
    let thread = Arc::clone(job.thread());
    let root = job.is_root();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run()));
    if let Err(payload) = &outcome {
        let escalation = Escalation::panicked("job", payload.as_ref());
        error!(job_id, thread_id = %thread.id(), "job execution escaped with panic: {}", escalation.message());
        thread.process().escalate_detached(escalation);
        thread.chain_complete(root);
    }
    counters.end(outcome.is_err());
}
