//! The context a function body executes against.

use std::any::Any;
use std::sync::Arc;

use crate::core::engine::EngineCore;
use crate::core::function::{FlowCallback, Parameter};
use crate::core::object::ManagedObject;
use crate::core::{Escalation, EscalationMatcher};
use crate::util::{ProcessId, ThreadStateId};

/// A flow requested through [`FunctionContext::do_flow`].
pub(crate) struct FlowRequest {
    pub index: usize,
    pub parameter: Option<Parameter>,
    pub callback: Option<FlowCallback>,
}

/// What the body asked the engine to do once it returns.
#[derive(Default)]
pub(crate) struct FunctionOutputs {
    pub next: Option<(usize, Option<Parameter>)>,
    pub flows: Vec<FlowRequest>,
    pub boundaries: Vec<(EscalationMatcher, usize)>,
}

/// Resolved objects, the parameter and the continuation requests of one
/// function execution.
///
/// Object and flow indices follow the declaration order in
/// [`FunctionMetaData`](crate::core::FunctionMetaData).
pub struct FunctionContext {
    core: Arc<EngineCore>,
    function: Arc<str>,
    process_id: ProcessId,
    thread_id: ThreadStateId,
    objects: Vec<ManagedObject>,
    parameter: Option<Parameter>,
    flow_count: usize,
    outputs: FunctionOutputs,
}

impl FunctionContext {
    pub(crate) fn new(
        core: Arc<EngineCore>,
        function: Arc<str>,
        process_id: ProcessId,
        thread_id: ThreadStateId,
        objects: Vec<ManagedObject>,
        parameter: Option<Parameter>,
        flow_count: usize,
    ) -> Self {
        Self {
            core,
            function,
            process_id,
            thread_id,
            objects,
            parameter,
            flow_count,
            outputs: FunctionOutputs::default(),
        }
    }

    /// Name of the executing function.
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.function
    }

    /// Owning process.
    #[must_use]
    pub const fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Executing thread state.
    #[must_use]
    pub const fn thread_id(&self) -> ThreadStateId {
        self.thread_id
    }

    /// The `index`-th declared object.
    #[must_use]
    pub fn get_object(&self, index: usize) -> Option<&ManagedObject> {
        self.objects.get(index)
    }

    /// Typed access to the `index`-th declared object.
    #[must_use]
    pub fn object<T: Any + Send + Sync>(&self, index: usize) -> Option<&T> {
        self.objects.get(index)?.downcast_ref::<T>()
    }

    /// Typed access to the parameter.
    #[must_use]
    pub fn parameter<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.parameter.as_ref()?.downcast_ref::<T>()
    }

    /// The untyped parameter.
    #[must_use]
    pub const fn raw_parameter(&self) -> Option<&Parameter> {
        self.parameter.as_ref()
    }

    /// Instigate the `index`-th declared flow once the body returns.
    ///
    /// # Errors
    ///
    /// Returns an escalation if `index` is not a declared flow.
    pub fn do_flow<P: Any + Send + Sync>(
        &mut self,
        index: usize,
        parameter: P,
        callback: Option<FlowCallback>,
    ) -> Result<(), Escalation> {
        self.do_flow_raw(index, Some(Arc::new(parameter)), callback)
    }

    /// As [`do_flow`](Self::do_flow) with an already shared or absent parameter.
    ///
    /// # Errors
    ///
    /// Returns an escalation if `index` is not a declared flow.
    pub fn do_flow_raw(
        &mut self,
        index: usize,
        parameter: Option<Parameter>,
        callback: Option<FlowCallback>,
    ) -> Result<(), Escalation> {
        if index >= self.flow_count {
            return Err(Escalation::new(
                "unknown_flow",
                format!("`{}` has no flow at index {index}", self.function),
            ));
        }
        self.outputs.flows.push(FlowRequest {
            index,
            parameter,
            callback,
        });
        Ok(())
    }

    /// Override the declared next function.
    ///
    /// # Errors
    ///
    /// Returns an escalation if no function is named `name`.
    pub fn set_next_function<P: Any + Send + Sync>(
        &mut self,
        name: &str,
        parameter: P,
    ) -> Result<(), Escalation> {
        let function = self.resolve(name)?;
        self.outputs.next = Some((function, Some(Arc::new(parameter))));
        Ok(())
    }

    /// Install an escalation boundary around the rest of this chain.
    ///
    /// Escalations accepted by `matcher` that are raised after this function
    /// (by its next function, its sequential flows and their continuations)
    /// run `handler` with the escalation as parameter.
    ///
    /// # Errors
    ///
    /// Returns an escalation if no function is named `handler`.
    pub fn handle_escalations(
        &mut self,
        matcher: EscalationMatcher,
        handler: &str,
    ) -> Result<(), Escalation> {
        let function = self.resolve(handler)?;
        self.outputs.boundaries.push((matcher, function));
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<usize, Escalation> {
        self.core.function_index(name).ok_or_else(|| {
            Escalation::new("unknown_function", format!("no function named `{name}`"))
        })
    }

    pub(crate) fn into_outputs(self) -> FunctionOutputs {
        self.outputs
    }
}
