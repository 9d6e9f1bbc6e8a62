//! Team that runs jobs on the assigning thread.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::{execute_job, Job, JobRejected, Team, TeamCounters, TeamError, TeamStats};

/// Executes each job synchronously inside `assign_job`.
///
/// Useful for tests and for functions that must run on the caller's thread.
#[derive(Debug)]
pub struct PassiveTeam {
    name: String,
    counters: TeamCounters,
    stopped: AtomicBool,
}

impl PassiveTeam {
    /// Create a passive team.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counters: TeamCounters::default(),
            stopped: AtomicBool::new(false),
        }
    }
}

impl Team for PassiveTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_working(&self) -> Result<(), TeamError> {
        self.stopped.store(false, Ordering::Release);
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
        self.counters.job_assigned();
        execute_job(job, &self.counters);
        Ok(())
    }

    fn stop_working(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn stats(&self) -> TeamStats {
        self.counters.snapshot(0)
    }
}
