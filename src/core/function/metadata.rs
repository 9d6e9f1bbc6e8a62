//! Function declarations and their resolved, index-based form.

use std::fmt;
use std::sync::Arc;

use crate::core::function::{
    Administration, AdministrationDeclaration, FlowStrategy, FnFunction, FunctionContext,
    ManagedFunction, ManagedFunctionFactory,
};
use crate::core::{Escalation, EscalationMatcher};

pub(crate) enum FunctionBody {
    Ready(Arc<dyn ManagedFunction>),
    Factory(Arc<dyn ManagedFunctionFactory>),
}

/// Declaration of a managed function, referring to teams, objects and other
/// functions by name. Names are resolved to indices when the engine is built.
pub struct FunctionMetaData {
    pub(crate) name: String,
    pub(crate) body: FunctionBody,
    pub(crate) team: Option<String>,
    pub(crate) objects: Vec<String>,
    pub(crate) flows: Vec<(String, FlowStrategy)>,
    pub(crate) next: Option<String>,
    pub(crate) pre_administration: Vec<AdministrationDeclaration>,
    pub(crate) post_administration: Vec<AdministrationDeclaration>,
    pub(crate) escalation_handlers: Vec<(EscalationMatcher, String)>,
}

impl FunctionMetaData {
    /// Declare a function with a ready body.
    pub fn new(name: impl Into<String>, body: Arc<dyn ManagedFunction>) -> Self {
        Self::with_body(name.into(), FunctionBody::Ready(body))
    }

    /// Declare a function whose body is a closure.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut FunctionContext) -> Result<(), Escalation> + Send + Sync + 'static,
    {
        Self::new(name, Arc::new(FnFunction::new(f)))
    }

    /// Declare a function whose body is created from its resolved layout.
    pub fn from_factory(name: impl Into<String>, factory: Arc<dyn ManagedFunctionFactory>) -> Self {
        Self::with_body(name.into(), FunctionBody::Factory(factory))
    }

    fn with_body(name: String, body: FunctionBody) -> Self {
        Self {
            name,
            body,
            team: None,
            objects: Vec::new(),
            flows: Vec::new(),
            next: None,
            pre_administration: Vec::new(),
            post_administration: Vec::new(),
            escalation_handlers: Vec::new(),
        }
    }

    /// Run on the named team instead of the engine's default team.
    #[must_use]
    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    /// Append an object dependency; its index is the declaration position.
    #[must_use]
    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.objects.push(object.into());
        self
    }

    /// Append a flow to `function`; its index is the declaration position.
    #[must_use]
    pub fn with_flow(mut self, function: impl Into<String>, strategy: FlowStrategy) -> Self {
        self.flows.push((function.into(), strategy));
        self
    }

    /// Default next function, used unless the body sets one explicitly.
    #[must_use]
    pub fn with_next(mut self, function: impl Into<String>) -> Self {
        self.next = Some(function.into());
        self
    }

    /// Duty run immediately before the body.
    #[must_use]
    pub fn with_pre_administration(mut self, duty: AdministrationDeclaration) -> Self {
        self.pre_administration.push(duty);
        self
    }

    /// Duty run immediately after the body.
    #[must_use]
    pub fn with_post_administration(mut self, duty: AdministrationDeclaration) -> Self {
        self.post_administration.push(duty);
        self
    }

    /// Handler function for escalations this function raises.
    ///
    /// Handlers are tried in declaration order; the handler receives the
    /// [`Escalation`] as its parameter and continues the chain in place of
    /// the failed function.
    #[must_use]
    pub fn with_escalation_handler(
        mut self,
        matcher: EscalationMatcher,
        function: impl Into<String>,
    ) -> Self {
        self.escalation_handlers.push((matcher, function.into()));
        self
    }

    /// Declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for FunctionMetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionMetaData")
            .field("name", &self.name)
            .field("team", &self.team)
            .field("objects", &self.objects)
            .field("flows", &self.flows)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

/// A flow resolved to its target function.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlowDefinition {
    pub function: usize,
    pub strategy: FlowStrategy,
}

/// An administration duty resolved against its function's required objects.
pub(crate) struct AdministrationDuty {
    pub name: String,
    pub duty: Arc<dyn Administration>,
    /// Positions into `FunctionDefinition::required`.
    pub slots: Vec<usize>,
}

/// A function with every name resolved to an index.
pub(crate) struct FunctionDefinition {
    pub name: Arc<str>,
    pub body: Arc<dyn ManagedFunction>,
    pub team: usize,
    /// Binding indices to load, transitive dependencies first.
    pub required: Vec<usize>,
    /// Positions into `required` in object index order.
    pub object_slots: Vec<usize>,
    pub flows: Vec<FlowDefinition>,
    pub next: Option<usize>,
    pub pre_administration: Vec<AdministrationDuty>,
    pub post_administration: Vec<AdministrationDuty>,
    pub escalation_handlers: Vec<(EscalationMatcher, usize)>,
}

impl FunctionDefinition {
    /// First declared handler accepting `escalation`.
    pub fn handler_for(&self, escalation: &Escalation) -> Option<usize> {
        self.escalation_handlers
            .iter()
            .find(|(matcher, _)| matcher.matches(escalation))
            .map(|(_, function)| *function)
    }
}
