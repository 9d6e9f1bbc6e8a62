//! Core execution engine: functions, jobs, containers, states, teams and
//! the escalation chain.

pub mod audit;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod function;
pub mod object;
pub mod state;
pub mod synchroniser;
pub mod team;

use std::future::Future;

pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink};
pub use engine::{EngineStats, FunctionEngine, ProcessHandle, ProcessOptions, ProcessOutcome};
pub use error::{AppResult, EngineError, SourceError};
pub use escalation::{
    CleanupEscalation, Escalation, EscalationHandler, EscalationKind, EscalationMatcher,
    LoggingTerminalHandler, TerminalEscalationHandler,
};
pub use function::{
    Administration, AdministrationContext, AdministrationDeclaration, FlowCallback, FlowStrategy,
    FnFunction, FunctionContext, FunctionLayout, FunctionMetaData, Job, ManagedFunction,
    ManagedFunctionFactory, Parameter,
};
pub use object::{
    ContainerStatus, ExecuteContext, ManagedObject, ManagedObjectContainer, ManagedObjectPool,
    ManagedObjectSource, ManagedObjectUser, ObjectDeclaration, ObjectScope,
    RecycleManagedObjectParameter, SourceContext, SourceMetaData, SourceSpecification,
};
pub use state::{ProcessPhase, ProcessState, ThreadKind, ThreadState, ThreadStatus};
pub use synchroniser::{
    SynchronisedSection, ThreadSynchroniser, ThreadSynchroniserFactory, ThreadSynchroniserRegistry,
    ThreadSynchronisers,
};
pub use team::{execute_job, execute_reserved_job, JobRejected, StopPolicy, Team, TeamCounters, TeamError, TeamStats};

/// Trait for spawning async tasks (runtime-agnostic).
pub trait Spawn {
    /// Spawn an async task that returns a future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
