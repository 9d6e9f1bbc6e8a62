//! The function engine: resolved graph, teams, sources and process entry.
//!
//! [`FunctionEngine`] is built by
//! [`EngineBuilder`](crate::builders::EngineBuilder). `open` starts the teams,
//! then the managed object sources, then the sources' startup functions;
//! `close` stops the sources (no further inbound flows), then the teams, then
//! empties the object pools.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::function::{FunctionDefinition, Job, Parameter};
use crate::core::object::{ObjectBinding, SourceRegistry};
use crate::core::state::{ProcessState, ThreadKind};
use crate::core::synchroniser::ThreadSynchroniserRegistry;
use crate::core::team::{Team, TeamError, TeamStats};
use crate::core::{
    EngineError, Escalation, EscalationHandler, EscalationMatcher, TerminalEscalationHandler,
};
use crate::util::{JobId, ProcessId, ThreadStateId};

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every chain completed, or every escalation was handled.
    Completed,
    /// An escalation reached the terminal handler.
    Escalated(Escalation),
}

impl ProcessOutcome {
    /// Whether the process completed without an unhandled escalation.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Per-process options for [`FunctionEngine::invoke_process_with`].
#[derive(Default)]
pub struct ProcessOptions {
    pub(crate) handler: Option<Arc<dyn EscalationHandler>>,
    pub(crate) on_complete: Option<Box<dyn FnOnce(&ProcessOutcome) + Send>>,
}

impl ProcessOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Top-level escalation handler for this process, replacing the engine's.
    #[must_use]
    pub fn with_escalation_handler(mut self, handler: Arc<dyn EscalationHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Called once with the outcome when the process completes.
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&ProcessOutcome) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for ProcessOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessOptions")
            .field("handler", &self.handler.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Handle to an invoked process.
#[derive(Clone)]
pub struct ProcessHandle {
    state: Arc<ProcessState>,
}

impl ProcessHandle {
    /// Process identifier.
    #[must_use]
    pub fn id(&self) -> ProcessId {
        self.state.id()
    }

    /// Whether the process completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.try_outcome().is_some()
    }

    /// The outcome, if the process completed.
    #[must_use]
    pub fn try_outcome(&self) -> Option<ProcessOutcome> {
        self.state.try_outcome()
    }

    /// Block until the process completes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Timeout`] if it does not complete in time.
    pub fn wait(&self, timeout: Duration) -> Result<ProcessOutcome, EngineError> {
        self.state.wait(timeout).ok_or(EngineError::Timeout)
    }

    /// The process state.
    #[must_use]
    pub const fn state(&self) -> &Arc<ProcessState> {
        &self.state
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle").field("state", &self.state).finish()
    }
}

/// Engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Processes invoked.
    pub processes_started: u64,
    /// Processes completed.
    pub processes_completed: u64,
    /// Processes currently running.
    pub active_processes: usize,
    /// Jobs created.
    pub jobs_created: u64,
}

/// Everything a running job needs, shared by all processes.
pub(crate) struct EngineCore {
    pub functions: Vec<Arc<FunctionDefinition>>,
    pub function_names: HashMap<String, usize>,
    pub teams: Vec<Arc<dyn Team>>,
    pub bindings: Vec<Arc<ObjectBinding>>,
    pub sources: SourceRegistry,
    pub synchronisers: ThreadSynchroniserRegistry,
    pub escalation_flows: Vec<(EscalationMatcher, usize)>,
    pub process_handler: Option<Arc<dyn EscalationHandler>>,
    pub terminal: Arc<dyn TerminalEscalationHandler>,
    pub audit: Option<Arc<dyn AuditSink>>,
    pub open: AtomicBool,
    pub job_ids: AtomicU64,
    pub audit_ids: AtomicU64,
    pub processes_started: AtomicU64,
    pub processes_completed: AtomicU64,
    pub active_processes: AtomicUsize,
}

impl EngineCore {
    pub fn function(&self, index: usize) -> &Arc<FunctionDefinition> {
        &self.functions[index]
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.function_names.get(name).copied()
    }

    pub fn binding(&self, index: usize) -> &Arc<ObjectBinding> {
        &self.bindings[index]
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub const fn synchronisers(&self) -> &ThreadSynchroniserRegistry {
        &self.synchronisers
    }

    pub fn process_handler(&self) -> Option<Arc<dyn EscalationHandler>> {
        self.process_handler.clone()
    }

    pub fn terminal(&self) -> &dyn TerminalEscalationHandler {
        self.terminal.as_ref()
    }

    pub fn next_job_id(&self) -> JobId {
        self.job_ids.fetch_add(1, Ordering::Relaxed)
    }

    pub fn escalation_flow_for(&self, escalation: &Escalation) -> Option<usize> {
        self.escalation_flows
            .iter()
            .find(|(matcher, _)| matcher.matches(escalation))
            .map(|(_, function)| *function)
    }

    /// Hand a job to its function's team. A refused job is abandoned when
    /// the team has stopped, and escalated against its process otherwise.
    pub fn dispatch(&self, job: Job) {
        let team = &self.teams[job.team()];
        if let Err(rejected) = team.assign_job(job) {
            match rejected.reason {
                TeamError::Stopped => {
                    let reason = format!("team `{}` has stopped working", team.name());
                    rejected.job.abandon(Escalation::abandoned(reason));
                }
                reason => {
                    warn!(team = team.name(), %reason, "team refused job");
                    rejected.job.reject(Escalation::rejected(team.name(), reason));
                }
            }
        }
    }

    pub fn record(
        &self,
        process: ProcessId,
        thread: ThreadStateId,
        function: &str,
        action: &str,
        payload: Option<String>,
    ) {
        if let Some(sink) = &self.audit {
            let event_id = self.audit_ids.fetch_add(1, Ordering::Relaxed);
            sink.record(build_audit_event(
                event_id.to_string(),
                process.to_string(),
                thread.to_string(),
                function,
                action,
                payload,
            ));
        }
    }

    /// Create a process with one thread state and dispatch its first job.
    pub fn start_process(
        self: &Arc<Self>,
        function: usize,
        parameter: Option<Parameter>,
        options: ProcessOptions,
    ) -> Result<ProcessHandle, EngineError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(EngineError::NotOpen);
        }
        let process = Arc::new(ProcessState::new(
            Arc::clone(self),
            options.handler,
            options.on_complete,
        ));
        self.processes_started.fetch_add(1, Ordering::Relaxed);
        self.active_processes.fetch_add(1, Ordering::AcqRel);

        let thread = process.create_thread(ThreadKind::Flow);
        let name = &self.function(function).name;
        debug!(process_id = %process.id(), function = %name, "invoking process");
        self.record(process.id(), thread.id(), name, "process_start", None);
        self.dispatch(Job::new(thread, function, parameter, Vec::new(), true));
        Ok(ProcessHandle { state: process })
    }

    pub fn process_finished(&self) {
        self.processes_completed.fetch_add(1, Ordering::Relaxed);
        self.active_processes.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Executes managed functions across teams on behalf of processes.
pub struct FunctionEngine {
    core: Arc<EngineCore>,
}

impl FunctionEngine {
    pub(crate) const fn new(core: Arc<EngineCore>) -> Self {
        Self { core }
    }

    #[cfg(test)]
    pub(crate) const fn core(&self) -> &Arc<EngineCore> {
        &self.core
    }

    /// Start the teams, then the sources, then the sources' startup functions.
    ///
    /// # Errors
    ///
    /// Returns an error if a team cannot start; teams already started are
    /// stopped again.
    pub fn open(&self) -> Result<(), EngineError> {
        if self.core.open.load(Ordering::Acquire) {
            return Ok(());
        }
        for (started, team) in self.core.teams.iter().enumerate() {
            if let Err(e) = team.start_working() {
                for team in &self.core.teams[..started] {
                    team.stop_working();
                }
                return Err(EngineError::TeamStart {
                    name: team.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }
        self.core.open.store(true, Ordering::Release);
        self.core.sources.start_all(&self.core);

        for function in self.core.sources.startup_functions() {
            self.core.start_process(function, None, ProcessOptions::default())?;
        }
        info!(
            teams = self.core.teams.len(),
            functions = self.core.functions.len(),
            "function engine open"
        );
        Ok(())
    }

    /// Stop the sources, then the teams, then empty the object pools.
    /// Idempotent.
    pub fn close(&self) {
        if !self.core.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.core.sources.stop_all();
        for team in &self.core.teams {
            team.stop_working();
        }
        for binding in &self.core.bindings {
            if let Some(pool) = &binding.pool {
                pool.empty();
            }
        }
        info!("function engine closed");
    }

    /// Whether the engine is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.core.open.load(Ordering::Acquire)
    }

    /// Invoke a new process starting at the named function.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not open or the function is unknown.
    pub fn invoke_process<P: Any + Send + Sync>(
        &self,
        function: &str,
        parameter: P,
    ) -> Result<ProcessHandle, EngineError> {
        self.invoke_process_with(function, Some(Arc::new(parameter)), ProcessOptions::default())
    }

    /// Invoke a new process with an optional parameter and options.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not open or the function is unknown.
    pub fn invoke_process_with(
        &self,
        function: &str,
        parameter: Option<Parameter>,
        options: ProcessOptions,
    ) -> Result<ProcessHandle, EngineError> {
        let index = self
            .core
            .function_index(function)
            .ok_or_else(|| EngineError::UnknownFunction(function.to_string()))?;
        self.core.start_process(index, parameter, options)
    }

    /// Counters of the named team.
    #[must_use]
    pub fn team_stats(&self, team: &str) -> Option<TeamStats> {
        self.core
            .teams
            .iter()
            .find(|t| t.name() == team)
            .map(|t| t.stats())
    }

    /// Engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            processes_started: self.core.processes_started.load(Ordering::Relaxed),
            processes_completed: self.core.processes_completed.load(Ordering::Relaxed),
            active_processes: self.core.active_processes.load(Ordering::Acquire),
            jobs_created: self.core.job_ids.load(Ordering::Relaxed),
        }
    }

    /// Names of the registered functions, in index order.
    #[must_use]
    pub fn function_names(&self) -> Vec<&str> {
        self.core.functions.iter().map(|f| &*f.name).collect()
    }
}

impl Drop for FunctionEngine {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for FunctionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionEngine")
            .field("open", &self.is_open())
            .field("functions", &self.core.functions.len())
            .field("teams", &self.core.teams.len())
            .field("objects", &self.core.bindings.len())
            .finish()
    }
}
