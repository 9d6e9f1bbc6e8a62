//! Team backed by a fixed pool of dedicated OS threads.
//!
//! # Design
//!
//! - **No polling**: workers block on a crossbeam channel `recv`
//! - **Clean shutdown**: dropping the sender unblocks idle workers; queued
//!   jobs are drained or abandoned per the team's [`StopPolicy`]
//! - **Lock-free fast path**: atomic counters, the sender lock is held only
//!   for the `try_send`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{TeamConfig, TeamKind};
use crate::core::{
    execute_job, Escalation, Job, JobRejected, StopPolicy, Team, TeamCounters, TeamError,
    TeamStats,
};

/// A team of `worker_count` dedicated threads fed by one job queue.
pub struct WorkerPoolTeam {
    name: String,
    config: TeamConfig,
    sender: Mutex<Option<Sender<Job>>>,
    counters: Arc<TeamCounters>,
    abandoning: Arc<AtomicBool>,
    started: AtomicBool,
    stopped: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPoolTeam {
    /// Create a worker pool team. Threads are spawned by `start_working`.
    ///
    /// # Errors
    ///
    /// Returns `TeamError::InvalidConfig` if the configuration is invalid.
    pub fn new(name: impl Into<String>, config: TeamConfig) -> Result<Self, TeamError> {
        config.validate().map_err(TeamError::InvalidConfig)?;
        Ok(Self {
            name: name.into(),
            config,
            sender: Mutex::new(None),
            counters: Arc::new(TeamCounters::default()),
            abandoning: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// A team with a single dedicated thread: its jobs run one at a time in
    /// assignment order.
    pub fn one_person(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: TeamConfig::new(TeamKind::OnePerson).with_worker_count(1),
            sender: Mutex::new(None),
            counters: Arc::new(TeamCounters::default()),
            abandoning: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    fn worker_count(&self) -> usize {
        if self.config.kind == TeamKind::OnePerson {
            1
        } else {
            self.config.worker_count
        }
    }
}

impl Team for WorkerPoolTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_working(&self) -> Result<(), TeamError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(TeamError::Stopped);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let (tx, rx) = match self.config.max_queue_depth {
            Some(depth) => bounded::<Job>(depth),
            None => unbounded::<Job>(),
        };
        let mut workers = self.workers.lock();
        for worker_id in 0..self.worker_count() {
            let worker = spawn_worker(
                &self.name,
                worker_id,
                rx.clone(),
                Arc::clone(&self.counters),
                Arc::clone(&self.abandoning),
                self.config.thread_stack_size,
            )?;
            workers.push(worker);
        }
        *self.sender.lock() = Some(tx);

        info!(
            team = %self.name,
            worker_count = workers.len(),
            max_queue_depth = ?self.config.max_queue_depth,
            "worker pool team started"
        );
        Ok(())
    }

    fn assign_job(&self, job: Job) -> Result<(), JobRejected> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            self.counters.job_rejected();
            return Err(JobRejected {
                job,
                reason: TeamError::Stopped,
            });
        };

        match tx.try_send(job) {
            Ok(()) => {
                self.counters.job_assigned();
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.counters.job_rejected();
                warn!(team = %self.name, "team queue is full");
                Err(JobRejected {
                    job,
                    reason: TeamError::QueueFull,
                })
            }
            Err(TrySendError::Disconnected(job)) => {
                self.counters.job_rejected();
                Err(JobRejected {
                    job,
                    reason: TeamError::Stopped,
                })
            }
        }
    }

    /// Drop the sender to unblock idle workers, then join every worker with
    /// a timeout. Workers that do not exit in time are detached.
    fn stop_working(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(team = %self.name, policy = ?self.config.stop_policy, "stopping worker pool team");

        if self.config.stop_policy == StopPolicy::Abandon {
            self.abandoning.store(true, Ordering::Release);
        }
        *self.sender.lock() = None;

        let current = thread::current().id();
        let timeout = Duration::from_millis(self.config.stop_timeout_ms);
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let worker_count = workers.len();

        for (idx, worker) in workers.into_iter().enumerate() {
            if worker.thread().id() == current {
                debug!(worker_id = idx, "stop requested from a worker; not joining itself");
                continue;
            }
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });

            match rx.recv_timeout(timeout) {
                Ok(true) => debug!(worker_id = idx, "worker joined successfully"),
                Ok(false) => warn!(worker_id = idx, "worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "worker did not exit within timeout - detaching");
                    continue;
                }
            }
            let _ = join_thread.join();
        }

        info!(team = %self.name, worker_count, "worker pool team stopped");
    }

    fn stats(&self) -> TeamStats {
        self.counters.snapshot(self.worker_count())
    }
}

impl Drop for WorkerPoolTeam {
    fn drop(&mut self) {
        // Signal shutdown without joining; explicit stop_working joins.
        if !self.stopped.swap(true, Ordering::AcqRel) {
            *self.sender.lock() = None;
            debug!(team = %self.name, "worker pool team dropped without stop - workers detached");
        }
    }
}

fn spawn_worker(
    team: &str,
    worker_id: usize,
    jobs: Receiver<Job>,
    counters: Arc<TeamCounters>,
    abandoning: Arc<AtomicBool>,
    stack_size: usize,
) -> Result<JoinHandle<()>, TeamError> {
    let team_name = team.to_string();
    thread::Builder::new()
        .name(format!("{team}-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(team = %team_name, worker_id, "worker thread started");
            // When the sender is dropped, recv drains the queue then errors.
            while let Ok(job) = jobs.recv() {
                if abandoning.load(Ordering::Acquire) {
                    counters.job_abandoned();
                    job.abandon(Escalation::abandoned(format!(
                        "team `{team_name}` stopped with queued jobs"
                    )));
                    continue;
                }
                execute_job(job, &counters);
            }
            debug!(team = %team_name, worker_id, "worker thread exiting");
        })
        .map_err(|e| TeamError::Internal(format!("failed to spawn worker thread: {e}")))
}
