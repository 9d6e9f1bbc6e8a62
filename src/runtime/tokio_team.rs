//! Team that runs jobs on a tokio runtime's blocking pool.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tracing::{info, warn};

use crate::config::TeamConfig;
use crate::core::{
    execute_job, Escalation, Job, JobRejected, StopPolicy, Team, TeamCounters, TeamError,
    TeamStats,
};

/// Runs each job with `spawn_blocking`, so function bodies may block
/// without stalling the runtime's async workers.
pub struct TokioTeam {
    name: String,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    counters: Arc<TeamCounters>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Option<usize>,
    worker_count: usize,
    stop_policy: StopPolicy,
    stop_timeout: Duration,
    abandoning: Arc<AtomicBool>,
    stopped: AtomicBool,
}

impl TokioTeam {
    /// Run jobs on the runtime behind `handle`.
    pub fn new(name: impl Into<String>, handle: Handle) -> Self {
        Self {
            name: name.into(),
            handle,
            runtime: Mutex::new(None),
            counters: Arc::new(TeamCounters::default()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: None,
            worker_count: 0,
            stop_policy: StopPolicy::Drain,
            stop_timeout: Duration::from_secs(2),
            abandoning: Arc::new(AtomicBool::new(false)),
            stopped: AtomicBool::new(false),
        }
    }

    /// Build a dedicated runtime sized by `config`; `max_queue_depth` bounds
    /// the jobs queued or running at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the runtime
    /// cannot be built.
    pub fn from_config(name: impl Into<String>, config: &TeamConfig) -> Result<Self, TeamError> {
        config.validate().map_err(TeamError::InvalidConfig)?;
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_count)
            .thread_name(format!("{name}-tokio"))
            .thread_stack_size(config.thread_stack_size)
            .enable_all()
            .build()
            .map_err(|e| TeamError::Internal(format!("failed to build runtime: {e}")))?;

        let mut team = Self::new(name, runtime.handle().clone());
        *team.runtime.get_mut() = Some(runtime);
        team.max_in_flight = config.max_queue_depth;
        team.worker_count = config.worker_count;
        team.stop_policy = config.stop_policy;
        team.stop_timeout = Duration::from_millis(config.stop_timeout_ms);
        Ok(team)
    }

    /// Bound the number of jobs queued or running at once.
    #[must_use]
    pub const fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = Some(max);
        self
    }

    /// What to do with queued jobs when stopping.
    #[must_use]
    pub const fn with_stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    fn try_reserve(&self) -> bool {
        let Some(max) = self.max_in_flight else {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            return true;
        };
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= max {
                return false;
            }
            match self.in_flight.compare_exchange_weak(
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
}

impl Team for TokioTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_working(&self) -> Result<(), TeamError> {
        self.stopped.store(false, Ordering::Release);
        info!(team = %self.name, "tokio team started");
        Ok(())
    }

    fn assign_job(&self, job: Job) -> Result<(), JobRejected> {
        if self.stopped.load(Ordering::Acquire) {
            self.counters.job_rejected();
            return Err(JobRejected {
                job,
                reason: TeamError::Stopped,
            });
        }
        if !self.try_reserve() {
            self.counters.job_rejected();
            warn!(team = %self.name, "team queue is full");
            return Err(JobRejected {
                job,
                reason: TeamError::QueueFull,
            });
        }

        self.counters.job_assigned();
        let counters = Arc::clone(&self.counters);
        let in_flight = Arc::clone(&self.in_flight);
        let abandoning = Arc::clone(&self.abandoning);
        let team = self.name.clone();
        self.handle.spawn_blocking(move || {
            if abandoning.load(Ordering::Acquire) {
                counters.job_abandoned();
                job.abandon(Escalation::abandoned(format!(
                    "team `{team}` stopped with queued jobs"
                )));
            } else {
                execute_job(job, &counters);
            }
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
        Ok(())
    }

    fn stop_working(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.stop_policy == StopPolicy::Abandon {
            self.abandoning.store(true, Ordering::Release);
        }
        if !self.counters.wait_idle(self.stop_timeout) {
            warn!(team = %self.name, "jobs still running after stop timeout");
        }
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
        info!(team = %self.name, "tokio team stopped");
    }

    fn stats(&self) -> TeamStats {
        self.counters.snapshot(self.worker_count)
    }
}

impl Drop for TokioTeam {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics; detach it instead.
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for TokioTeam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioTeam")
            .field("name", &self.name)
            .field("max_in_flight", &self.max_in_flight)
            .field("stop_policy", &self.stop_policy)
            .finish_non_exhaustive()
    }
}
