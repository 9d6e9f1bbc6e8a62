//! Jobs: one execution of a function against a thread state.
//!
//! A job carries its chain's continuation stack. Running a job loads its
//! objects (parking inside a container that is still sourcing), runs the
//! administration duties and body between the synchroniser resume and
//! suspend hooks, then either continues the chain or walks the escalation
//! chain. Continuations on the same team run inline in the same loop;
//! continuations on another team are assigned to it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::core::engine::EngineCore;
use crate::core::function::context::{FlowRequest, FunctionOutputs};
use crate::core::function::{
    AdministrationContext, AdministrationDuty, FlowCallback, FlowStrategy, FunctionContext,
    FunctionDefinition, Parameter,
};
use crate::core::object::{Acquire, ManagedObject, ManagedObjectContainer, ObjectScope, RecycleBatch};
use crate::core::state::{ThreadKind, ThreadState};
use crate::core::{Escalation, EscalationMatcher};
use crate::util::JobId;

/// An entry of a chain's continuation stack.
pub(crate) enum Continuation {
    /// A function still to run.
    Function {
        function: usize,
        parameter: Option<Parameter>,
    },
    /// Completion callback of a flow; reached when the flow's chain ends.
    Callback(FlowCallback),
    /// Escalation boundary installed by `FunctionContext::handle_escalations`.
    Boundary {
        matcher: EscalationMatcher,
        handler: usize,
    },
}

enum Step {
    Next(Job),
    Done,
}

/// One invocation of a managed function against a thread state.
///
/// Consumed when run. Teams receive jobs through
/// [`Team::assign_job`](crate::core::Team::assign_job) and either
/// [`run`](Self::run) or [`abandon`](Self::abandon) them.
pub struct Job {
    id: JobId,
    thread: Arc<ThreadState>,
    function: usize,
    parameter: Option<Parameter>,
    stack: Vec<Continuation>,
    root: bool,
    handling: bool,
    function_containers: Vec<Arc<ManagedObjectContainer>>,
}

impl Job {
    pub(crate) fn new(
        thread: Arc<ThreadState>,
        function: usize,
        parameter: Option<Parameter>,
        stack: Vec<Continuation>,
        root: bool,
    ) -> Self {
        let id = thread.process().core().next_job_id();
        Self {
            id,
            thread,
            function,
            parameter,
            stack,
            root,
            handling: false,
            function_containers: Vec::new(),
        }
    }

    /// Start a root chain from a prepared stack whose top is a function.
    pub(crate) fn start_chain(thread: Arc<ThreadState>, mut stack: Vec<Continuation>) {
        match stack.pop() {
            Some(Continuation::Function { function, parameter }) => {
                let core = Arc::clone(thread.process().core());
                core.dispatch(Self::new(thread, function, parameter, stack, true));
            }
            _ => thread.chain_complete(true),
        }
    }

    /// Engine-wide sequence number.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Name of the function this job runs.
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.core().function(self.function).name
    }

    /// The thread state the job runs against.
    #[must_use]
    pub const fn thread(&self) -> &Arc<ThreadState> {
        &self.thread
    }

    pub(crate) fn team(&self) -> usize {
        self.core().function(self.function).team
    }

    fn core(&self) -> &Arc<EngineCore> {
        self.thread.process().core()
    }

    /// Run the job and every continuation that stays on the same team.
    pub fn run(self) {
        let mut job = self;
        loop {
            let team = job.team();
            match job.step() {
                Step::Next(next) if next.team() == team => job = next,
                Step::Next(next) => {
                    let core = Arc::clone(next.core());
                    core.dispatch(next);
                    return;
                }
                Step::Done => return,
            }
        }
    }

    /// Re-assign a job that was parked on a container.
    pub(crate) fn resume(self) {
        let core = Arc::clone(self.core());
        core.dispatch(self);
    }

    /// Terminate the chain without running it: every pending flow callback
    /// receives `escalation`, then the chain ends.
    pub fn abandon(mut self, escalation: Escalation) {
        self.recycle_function_objects();
        warn!(
            job_id = self.id,
            function = self.function_name(),
            "abandoning chain: {}",
            escalation.message()
        );
        self.thread.process().record(
            self.thread.id(),
            self.function_name(),
            "abandon",
            Some(escalation.to_string()),
        );
        while let Some(entry) = self.stack.pop() {
            if let Continuation::Callback(callback) = entry {
                if let Err(raised) = run_callback(callback, Some(escalation.clone())) {
                    debug!(job_id = self.id, "callback of abandoned chain raised: {}", raised.message());
                }
            }
        }
        self.finish_chain();
    }

    /// A team refused this job: the refusal escalates against the process
    /// and the chain is abandoned.
    pub(crate) fn reject(self, escalation: Escalation) {
        self.thread
            .process()
            .escalation_unhandled(Some(self.thread.id()), escalation.clone());
        self.abandon(escalation);
    }

    fn step(mut self) -> Step {
        let core = Arc::clone(self.core());
        if self.thread.process().is_torn_down() && !self.thread.is_cleanup() {
            let reason = format!("process {} was torn down", self.thread.process().id());
            self.abandon(Escalation::abandoned(reason));
            return Step::Done;
        }
        let definition = Arc::clone(core.function(self.function));

        let mut loaded = Vec::with_capacity(definition.required.len());
        for &binding in &definition.required {
            let container = self.container_for(&core, binding);
            match container.acquire(self) {
                Acquire::Ready(job, object) => {
                    self = job;
                    loaded.push(object);
                }
                Acquire::Parked => return Step::Done,
                Acquire::Failed(job, escalation) => return job.escalate(&definition, escalation),
            }
        }

        debug!(
            job_id = self.id,
            process_id = %self.thread.process().id(),
            thread_id = %self.thread.id(),
            function = %definition.name,
            "executing function"
        );
        let thread = Arc::clone(&self.thread);
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| thread.synchronisers().resume())) {
            Ok(section) => {
                let outcome = self.execute(&core, &definition, &loaded);
                match panic::catch_unwind(AssertUnwindSafe(move || section.suspend())) {
                    Ok(()) => outcome,
                    Err(payload) => Err(Escalation::panicked("thread synchroniser suspend", payload.as_ref())),
                }
            }
            Err(payload) => Err(Escalation::panicked("thread synchroniser resume", payload.as_ref())),
        };
        drop(loaded);

        self.thread
            .process()
            .record(self.thread.id(), &definition.name, "execute", None);
        match outcome {
            Ok(outputs) => self.continue_with(&core, &definition, outputs),
            Err(escalation) => self.escalate(&definition, escalation),
        }
    }

    fn execute(
        &mut self,
        core: &Arc<EngineCore>,
        definition: &FunctionDefinition,
        loaded: &[ManagedObject],
    ) -> Result<FunctionOutputs, Escalation> {
        for duty in &definition.pre_administration {
            administer(definition, duty, loaded)?;
        }

        let objects = definition
            .object_slots
            .iter()
            .map(|&slot| Arc::clone(&loaded[slot]))
            .collect();
        let mut context = FunctionContext::new(
            Arc::clone(core),
            Arc::clone(&definition.name),
            self.thread.process().id(),
            self.thread.id(),
            objects,
            self.parameter.take(),
            definition.flows.len(),
        );
        let body = Arc::clone(&definition.body);
        match panic::catch_unwind(AssertUnwindSafe(|| body.execute(&mut context))) {
            Ok(Ok(())) => {}
            Ok(Err(escalation)) => return Err(escalation),
            Err(payload) => return Err(Escalation::panicked(&definition.name, payload.as_ref())),
        }

        for duty in &definition.post_administration {
            administer(definition, duty, loaded)?;
        }
        Ok(context.into_outputs())
    }

    /// Push the body's continuations, dispatch its parallel and spawned
    /// flows, then proceed with the top of the stack.
    fn continue_with(
        mut self,
        core: &Arc<EngineCore>,
        definition: &FunctionDefinition,
        outputs: FunctionOutputs,
    ) -> Step {
        self.recycle_function_objects();
        let FunctionOutputs {
            next,
            flows,
            boundaries,
        } = outputs;

        for (matcher, handler) in boundaries {
            self.stack.push(Continuation::Boundary { matcher, handler });
        }
        if let Some((function, parameter)) = next.or_else(|| definition.next.map(|f| (f, None))) {
            self.stack.push(Continuation::Function {
                function,
                parameter,
            });
        }

        let mut sequential = Vec::new();
        for request in flows {
            let flow = definition.flows[request.index];
            match flow.strategy {
                FlowStrategy::Sequential => sequential.push((flow.function, request)),
                FlowStrategy::Parallel => self.instigate_parallel(core, flow.function, request),
                FlowStrategy::Spawn => self.instigate_spawn(core, flow.function, request),
            }
        }
        for (function, request) in sequential.into_iter().rev() {
            if let Some(callback) = request.callback {
                self.stack.push(Continuation::Callback(callback));
            }
            self.stack.push(Continuation::Function {
                function,
                parameter: request.parameter,
            });
        }

        self.proceed()
    }

    fn instigate_parallel(&self, core: &Arc<EngineCore>, function: usize, request: FlowRequest) {
        trace!(job_id = self.id, function, "instigating parallel flow");
        self.thread.begin_chain();
        let stack = request.callback.map(Continuation::Callback).into_iter().collect();
        let job = Self::new(Arc::clone(&self.thread), function, request.parameter, stack, false);
        core.dispatch(job);
    }

    fn instigate_spawn(&self, core: &Arc<EngineCore>, function: usize, request: FlowRequest) {
        let thread = self.thread.process().create_thread(ThreadKind::Flow);
        trace!(job_id = self.id, function, thread_id = %thread.id(), "spawning thread state");
        let stack = request.callback.map(Continuation::Callback).into_iter().collect();
        let job = Self::new(thread, function, request.parameter, stack, true);
        core.dispatch(job);
    }

    /// Pop the stack until the next function; callbacks on the way learn
    /// their flow completed.
    fn proceed(mut self) -> Step {
        while let Some(entry) = self.stack.pop() {
            match entry {
                Continuation::Function {
                    function,
                    parameter,
                } => return Step::Next(self.next_job(function, parameter)),
                Continuation::Boundary { .. } => {}
                Continuation::Callback(callback) => {
                    if let Err(escalation) = run_callback(callback, None) {
                        return self.unwind(escalation);
                    }
                }
            }
        }
        self.finish_chain();
        Step::Done
    }

    /// Handlers declared on the failed function first, then the stack.
    fn escalate(mut self, definition: &FunctionDefinition, escalation: Escalation) -> Step {
        self.recycle_function_objects();
        debug!(
            job_id = self.id,
            function = %definition.name,
            kind = %escalation.kind(),
            label = escalation.label(),
            "function escalated: {}",
            escalation.message()
        );
        if let Some(handler) = definition.handler_for(&escalation) {
            return Step::Next(self.next_job(handler, Some(Arc::new(escalation))));
        }
        self.unwind(escalation)
    }

    /// Walk the stack top-down: skip pending functions, hand the escalation
    /// to the first accepting boundary or callback.
    fn unwind(mut self, escalation: Escalation) -> Step {
        let mut escalation = escalation;
        while let Some(entry) = self.stack.pop() {
            match entry {
                Continuation::Function { .. } => {}
                Continuation::Boundary { matcher, handler } => {
                    if matcher.matches(&escalation) {
                        return Step::Next(self.next_job(handler, Some(Arc::new(escalation))));
                    }
                }
                Continuation::Callback(callback) => {
                    match run_callback(callback, Some(escalation.clone())) {
                        Ok(()) => return self.proceed(),
                        Err(raised) => escalation = raised,
                    }
                }
            }
        }
        self.unhandled(escalation)
    }

    /// Nothing on the chain handled it: engine escalation flows, then the
    /// process.
    fn unhandled(mut self, escalation: Escalation) -> Step {
        if !self.handling {
            if let Some(function) = self.core().escalation_flow_for(&escalation) {
                self.handling = true;
                return Step::Next(self.next_job(function, Some(Arc::new(escalation))));
            }
        }
        let thread = Arc::clone(&self.thread);
        thread
            .process()
            .escalation_unhandled(Some(thread.id()), escalation);
        self.finish_chain();
        Step::Done
    }

    fn next_job(self, function: usize, parameter: Option<Parameter>) -> Self {
        let mut job = Self::new(self.thread, function, parameter, self.stack, self.root);
        job.handling = self.handling;
        job
    }

    pub(crate) const fn is_root(&self) -> bool {
        self.root
    }

    fn finish_chain(self) {
        self.thread.chain_complete(self.root);
    }

    fn container_for(&mut self, core: &EngineCore, binding: usize) -> Arc<ManagedObjectContainer> {
        let declared = core.binding(binding);
        match declared.scope {
            ObjectScope::Function => {
                if let Some(found) = self
                    .function_containers
                    .iter()
                    .find(|c| c.binding().index == binding)
                {
                    return Arc::clone(found);
                }
                let dependencies = self.dependency_containers(core, binding);
                let container = Arc::new(ManagedObjectContainer::new(
                    Arc::clone(declared),
                    dependencies,
                    Arc::downgrade(self.thread.process()),
                ));
                self.function_containers.push(Arc::clone(&container));
                container
            }
            ObjectScope::Thread => {
                if let Some(found) = self.thread.existing_container(binding) {
                    return found;
                }
                let dependencies = self.dependency_containers(core, binding);
                self.thread.container(declared, dependencies)
            }
            ObjectScope::Process => {
                if let Some(found) = self.thread.process().existing_container(binding) {
                    return found;
                }
                let dependencies = self.dependency_containers(core, binding);
                self.thread.process().container(declared, dependencies)
            }
        }
    }

    fn dependency_containers(&mut self, core: &EngineCore, binding: usize) -> Vec<Arc<ManagedObjectContainer>> {
        core.binding(binding)
            .dependencies
            .iter()
            .map(|&dependency| self.container_for(core, dependency))
            .collect()
    }

    fn recycle_function_objects(&mut self) {
        if self.function_containers.is_empty() {
            return;
        }
        let containers = std::mem::take(&mut self.function_containers);
        RecycleBatch::start(self.thread.process(), containers);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("function", &self.function_name())
            .field("thread", &self.thread.id())
            .field("stack_depth", &self.stack.len())
            .finish_non_exhaustive()
    }
}

fn administer(
    definition: &FunctionDefinition,
    duty: &AdministrationDuty,
    loaded: &[ManagedObject],
) -> Result<(), Escalation> {
    let objects = duty.slots.iter().map(|&slot| Arc::clone(&loaded[slot])).collect();
    let mut context = AdministrationContext::new(Arc::clone(&definition.name), objects);
    match panic::catch_unwind(AssertUnwindSafe(|| duty.duty.administer(&mut context))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let panicked = Escalation::panicked(&duty.name, payload.as_ref());
            Err(Escalation::administration(&duty.name, panicked.message()))
        }
    }
}

fn run_callback(callback: FlowCallback, outcome: Option<Escalation>) -> Result<(), Escalation> {
    panic::catch_unwind(AssertUnwindSafe(move || callback(outcome)))
        .unwrap_or_else(|payload| Err(Escalation::panicked("flow callback", payload.as_ref())))
}
