//! Managed functions: the schedulable units of work.
//!
//! A function is declared with [`FunctionMetaData`] (object dependencies,
//! flows, default next function, administration, escalation handlers) and
//! executed by a [`Job`] against a `ThreadState`.

pub mod administration;
pub mod context;
pub mod job;
pub mod metadata;

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{EngineError, Escalation};

pub use administration::{Administration, AdministrationContext, AdministrationDeclaration};
pub use context::FunctionContext;
pub use job::Job;
pub use metadata::FunctionMetaData;

pub(crate) use metadata::{AdministrationDuty, FlowDefinition, FunctionDefinition};

/// Argument handed to a function, flow or handler.
pub type Parameter = Arc<dyn Any + Send + Sync>;

/// Completion callback of a flow.
///
/// Receives `None` when the flow's chain completed, or the escalation that
/// ended it. Returning `Err` re-raises into the invoking chain.
pub type FlowCallback = Box<dyn FnOnce(Option<Escalation>) -> Result<(), Escalation> + Send>;

/// How a flow is instigated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStrategy {
    /// Runs on the same thread state before the invoking function's continuation.
    #[default]
    Sequential,
    /// New chain on the same thread state, dispatched immediately and not awaited.
    Parallel,
    /// New thread state in the same process; the parent is not blocked.
    Spawn,
}

/// The body of a managed function.
pub trait ManagedFunction: Send + Sync {
    /// Execute against the resolved context.
    ///
    /// # Errors
    ///
    /// Returns the escalation to propagate up the handler chain.
    fn execute(&self, context: &mut FunctionContext) -> Result<(), Escalation>;
}

/// Adapts a closure into a [`ManagedFunction`].
pub struct FnFunction<F>(F);

impl<F> FnFunction<F>
where
    F: Fn(&mut FunctionContext) -> Result<(), Escalation> + Send + Sync,
{
    /// Wrap `f`.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ManagedFunction for FnFunction<F>
where
    F: Fn(&mut FunctionContext) -> Result<(), Escalation> + Send + Sync,
{
    fn execute(&self, context: &mut FunctionContext) -> Result<(), Escalation> {
        (self.0)(context)
    }
}

/// The resolved index layout a function body is created against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionLayout {
    /// Function name.
    pub name: String,
    /// Object names, in `FunctionContext::object` index order.
    pub objects: Vec<String>,
    /// Flow target names, in `FunctionContext::do_flow` index order.
    pub flows: Vec<String>,
}

/// Creates function bodies once the engine layout is resolved.
pub trait ManagedFunctionFactory: Send + Sync {
    /// Create the body for `layout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout does not fit the body.
    fn create_function(&self, layout: &FunctionLayout) -> Result<Arc<dyn ManagedFunction>, EngineError>;
}

impl<F> ManagedFunctionFactory for F
where
    F: Fn(&FunctionLayout) -> Result<Arc<dyn ManagedFunction>, EngineError> + Send + Sync,
{
    fn create_function(&self, layout: &FunctionLayout) -> Result<Arc<dyn ManagedFunction>, EngineError> {
        self(layout)
    }
}
