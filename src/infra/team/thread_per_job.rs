//! Team that spawns a fresh OS thread for every job.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::core::{execute_reserved_job, Job, JobRejected, Team, TeamCounters, TeamError, TeamStats};

/// Runs every job on its own short-lived thread.
#[derive(Debug)]
pub struct ThreadPerJobTeam {
    name: String,
    counters: Arc<TeamCounters>,
    stack_size: usize,
    stop_timeout: Duration,
    spawned: AtomicU64,
    stopped: AtomicBool,
}

impl ThreadPerJobTeam {
    /// Create a thread-per-job team.
    pub fn new(name: impl Into<String>, stack_size: usize, stop_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            counters: Arc::new(TeamCounters::default()),
            stack_size,
            stop_timeout,
            spawned: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }
}

impl Team for ThreadPerJobTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_working(&self) -> Result<(), TeamError> {
        self.stopped.store(false, Ordering::Release);
        Ok(())
    }

    fn assign_job(&self, job: Job) -> Result<(), JobRejected> {
        // Active from acceptance, so stop_working waits for unscheduled threads.
        self.counters.reserve();
        if self.stopped.load(Ordering::Acquire) {
            self.counters.cancel_reservation();
            self.counters.job_rejected();
            return Err(JobRejected {
                job,
                reason: TeamError::Stopped,
            });
        }

        // The slot lets a failed spawn hand the job back.
        let slot = Arc::new(Mutex::new(Some(job)));
        let worker_slot = Arc::clone(&slot);
        let counters = Arc::clone(&self.counters);
        let sequence = self.spawned.fetch_add(1, Ordering::Relaxed);
        let spawned = thread::Builder::new()
            .name(format!("{}-job-{sequence}", self.name))
            .stack_size(self.stack_size)
            .spawn(move || {
                let job = worker_slot.lock().take();
                match job {
                    Some(job) => execute_reserved_job(job, &counters),
                    None => counters.cancel_reservation(),
                }
            });

        match spawned {
            Ok(_) => {
                self.counters.job_assigned();
                Ok(())
            }
            Err(e) => {
                self.counters.cancel_reservation();
                self.counters.job_rejected();
                let reason = TeamError::Internal(format!("failed to spawn job thread: {e}"));
                match slot.lock().take() {
                    Some(job) => Err(JobRejected { job, reason }),
                    None => Ok(()),
                }
            }
        }
    }

    fn stop_working(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.counters.wait_idle(self.stop_timeout) {
            warn!(team = %self.name, "jobs still running after stop timeout");
        }
    }

    fn stats(&self) -> TeamStats {
        let stats = self.counters.snapshot(0);
        TeamStats {
            worker_count: usize::try_from(stats.active_jobs).unwrap_or(usize::MAX),
            ..stats
        }
    }
}
