//! Assembles teams, sources, objects and functions into a [`FunctionEngine`].
//!
//! Declarations refer to each other by name. `build` initialises the
//! sources, registers the functions they contribute, then resolves every
//! name to an index into the engine's arenas. Object dependency graphs are
//! checked for scope violations and cycles; function object lists are
//! expanded so transitive dependencies load first.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::sync::Arc;

use tracing::{debug, info};

use crate::builders::build_teams;
use crate::config::EngineConfig;
use crate::core::audit::AuditSink;
use crate::core::engine::EngineCore;
use crate::core::function::metadata::FunctionBody;
use crate::core::function::{
    AdministrationDeclaration, AdministrationDuty, FlowDefinition, FunctionDefinition,
    FunctionLayout, FunctionMetaData,
};
use crate::core::object::registry::SourceEntry;
use crate::core::object::source::ExecuteState;
use crate::core::object::{ObjectBinding, SourceRegistry};
use crate::core::{
    EngineError, EscalationHandler, EscalationMatcher, FunctionEngine, LoggingTerminalHandler,
    ManagedObjectSource, ObjectDeclaration, SourceContext, SourceError, SourceMetaData, Team,
    TerminalEscalationHandler, ThreadSynchroniserFactory, ThreadSynchroniserRegistry,
};
use crate::infra::PassiveTeam;

struct SourceDeclaration {
    name: String,
    source: Box<dyn ManagedObjectSource>,
}

struct InitialisedSource {
    name: String,
    source: Arc<dyn ManagedObjectSource>,
    metadata: SourceMetaData,
    recycle: Option<String>,
    startup: Vec<String>,
}

/// Builder for [`FunctionEngine`].
pub struct EngineBuilder {
    teams: Vec<Arc<dyn Team>>,
    default_team: Option<String>,
    sources: Vec<SourceDeclaration>,
    properties: HashMap<String, HashMap<String, String>>,
    flow_links: HashMap<String, HashMap<String, String>>,
    objects: Vec<ObjectDeclaration>,
    functions: Vec<FunctionMetaData>,
    synchronisers: ThreadSynchroniserRegistry,
    escalation_flows: Vec<(EscalationMatcher, String)>,
    process_handler: Option<Arc<dyn EscalationHandler>>,
    terminal: Arc<dyn TerminalEscalationHandler>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Empty builder. Without any team, a passive team named `passive` is used.
    #[must_use]
    pub fn new() -> Self {
        Self {
            teams: Vec::new(),
            default_team: None,
            sources: Vec::new(),
            properties: HashMap::new(),
            flow_links: HashMap::new(),
            objects: Vec::new(),
            functions: Vec::new(),
            synchronisers: ThreadSynchroniserRegistry::new(),
            escalation_flows: Vec::new(),
            process_handler: None,
            terminal: Arc::new(LoggingTerminalHandler),
            audit: None,
        }
    }

    /// Builder with the teams and default team of `cfg`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self, EngineError> {
        let mut builder = Self::new();
        builder.teams = build_teams(cfg)?;
        builder.default_team = Some(cfg.default_team.clone());
        Ok(builder)
    }

    /// Register a team.
    #[must_use]
    pub fn with_team<T: Team + 'static>(self, team: T) -> Self {
        self.with_shared_team(Arc::new(team))
    }

    /// Register a team shared with the caller.
    #[must_use]
    pub fn with_shared_team(mut self, team: Arc<dyn Team>) -> Self {
        self.teams.push(team);
        self
    }

    /// Team for functions that do not name one. Defaults to the first team.
    #[must_use]
    pub fn with_default_team(mut self, team: impl Into<String>) -> Self {
        self.default_team = Some(team.into());
        self
    }

    /// Register a managed object source under `name`.
    #[must_use]
    pub fn with_source<S: ManagedObjectSource + 'static>(
        mut self,
        name: impl Into<String>,
        source: S,
    ) -> Self {
        self.sources.push(SourceDeclaration {
            name: name.into(),
            source: Box::new(source),
        });
        self
    }

    /// Set property `key` of source `source`.
    #[must_use]
    pub fn with_source_property(
        mut self,
        source: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.properties
            .entry(source.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Link flow `key` of source `source` to `function`.
    #[must_use]
    pub fn link_source_flow(
        mut self,
        source: impl Into<String>,
        key: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        self.flow_links
            .entry(source.into())
            .or_default()
            .insert(key.into(), function.into());
        self
    }

    /// Declare a managed object.
    #[must_use]
    pub fn with_object(mut self, object: ObjectDeclaration) -> Self {
        self.objects.push(object);
        self
    }

    /// Declare a managed function.
    #[must_use]
    pub fn with_function(mut self, function: FunctionMetaData) -> Self {
        self.functions.push(function);
        self
    }

    /// Register a thread synchroniser factory; registration order is the
    /// suspend/resume order.
    #[must_use]
    pub fn with_synchroniser<F: ThreadSynchroniserFactory + 'static>(mut self, factory: F) -> Self {
        self.synchronisers.register(Arc::new(factory));
        self
    }

    /// Run `function` on the failing thread for escalations `matcher`
    /// accepts and nothing closer handled.
    #[must_use]
    pub fn with_escalation_flow(mut self, matcher: EscalationMatcher, function: impl Into<String>) -> Self {
        self.escalation_flows.push((matcher, function.into()));
        self
    }

    /// Top-level handler for processes invoked without their own.
    #[must_use]
    pub fn with_process_escalation_handler<H: EscalationHandler + 'static>(mut self, handler: H) -> Self {
        self.process_handler = Some(Arc::new(handler));
        self
    }

    /// Reporting sink for escalations nothing handled.
    #[must_use]
    pub fn with_terminal_handler<H: TerminalEscalationHandler + 'static>(mut self, handler: H) -> Self {
        self.terminal = Arc::new(handler);
        self
    }

    /// Record lifecycle events into `sink`.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Resolve every declaration and build the engine. The engine still
    /// has to be opened.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate or unknown names, a source failing
    /// its specification or init, a dependency cycle or scope violation,
    /// or a function factory refusing its layout.
    pub fn build(mut self) -> Result<FunctionEngine, EngineError> {
        if self.teams.is_empty() {
            self.teams.push(Arc::new(PassiveTeam::new("passive")));
        }
        let team_index = index_names("team", self.teams.iter().map(|t| t.name()))?;
        let default_team = match &self.default_team {
            Some(name) => *team_index
                .get(name.as_str())
                .ok_or_else(|| EngineError::UnknownTeam(name.clone()))?,
            None => 0,
        };

        let sources = init_sources(
            std::mem::take(&mut self.sources),
            &mut self.properties,
            &mut self.functions,
        )?;
        let source_index = index_names("source", sources.iter().map(|s| s.name.as_str()))?;

        let function_names: HashMap<String, usize> =
            index_names("function", self.functions.iter().map(FunctionMetaData::name))?
                .into_iter()
                .map(|(name, index)| (name.to_string(), index))
                .collect();
        let function_index = |name: &str| {
            function_names
                .get(name)
                .copied()
                .ok_or_else(|| EngineError::UnknownFunction(name.to_string()))
        };

        let bindings = resolve_bindings(&self.objects, &sources, &source_index, &function_index)?;
        let object_index: HashMap<&str, usize> =
            bindings.iter().map(|b| (b.name.as_str(), b.index)).collect();

        let mut functions = Vec::with_capacity(self.functions.len());
        for metadata in std::mem::take(&mut self.functions) {
            functions.push(Arc::new(resolve_function(
                metadata,
                &bindings,
                &object_index,
                &team_index,
                default_team,
                &function_index,
            )?));
        }

        let escalation_flows = self
            .escalation_flows
            .iter()
            .map(|(matcher, name)| Ok((matcher.clone(), function_index(name.as_str())?)))
            .collect::<Result<Vec<_>, EngineError>>()?;

        let mut registry = SourceRegistry::default();
        for source in sources {
            let mut links = self.flow_links.remove(&source.name).unwrap_or_default();
            let mut flows = Vec::with_capacity(source.metadata.flow_keys().len());
            for key in source.metadata.flow_keys() {
                let target = links.remove(key).ok_or_else(|| {
                    EngineError::InvalidConfig(format!(
                        "flow `{key}` of source `{}` is not linked to a function",
                        source.name
                    ))
                })?;
                flows.push(function_index(target.as_str())?);
            }
            if let Some(key) = links.keys().next() {
                return Err(EngineError::InvalidConfig(format!(
                    "source `{}` declares no flow `{key}`",
                    source.name
                )));
            }
            let startup = source
                .startup
                .iter()
                .map(|name| function_index(name.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            registry.push(SourceEntry {
                execute: Arc::new(ExecuteState::new(source.name.clone(), flows)),
                name: source.name,
                source: source.source,
                metadata: source.metadata,
                startup,
            });
        }
        if let Some(name) = self.flow_links.keys().next() {
            return Err(EngineError::UnknownSource(name.clone()));
        }

        info!(
            teams = self.teams.len(),
            functions = functions.len(),
            objects = bindings.len(),
            "function engine built"
        );
        let core = EngineCore {
            functions,
            function_names,
            teams: self.teams,
            bindings: bindings.into_iter().map(Arc::new).collect(),
            sources: registry,
            synchronisers: self.synchronisers,
            escalation_flows,
            process_handler: self.process_handler,
            terminal: self.terminal,
            audit: self.audit,
            open: AtomicBool::new(false),
            job_ids: AtomicU64::new(0),
            audit_ids: AtomicU64::new(0),
            processes_started: AtomicU64::new(0),
            processes_completed: AtomicU64::new(0),
            active_processes: AtomicUsize::new(0),
        };
        Ok(FunctionEngine::new(Arc::new(core)))
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("teams", &self.teams.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("sources", &self.sources.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("objects", &self.objects)
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}

fn index_names<'a, I>(kind: &'static str, names: I) -> Result<HashMap<&'a str, usize>, EngineError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut index = HashMap::new();
    for (position, name) in names.into_iter().enumerate() {
        if index.insert(name, position).is_some() {
            return Err(EngineError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(index)
}

/// Check required properties, run `init`, and append the recycle and
/// startup functions each source contributes to `functions`.
fn init_sources(
    declarations: Vec<SourceDeclaration>,
    properties: &mut HashMap<String, HashMap<String, String>>,
    functions: &mut Vec<FunctionMetaData>,
) -> Result<Vec<InitialisedSource>, EngineError> {
    let mut initialised = Vec::with_capacity(declarations.len());
    for SourceDeclaration { name, mut source } in declarations {
        let source_error = |source: SourceError| EngineError::Source {
            name: name.clone(),
            source,
        };
        let props = properties.remove(&name).unwrap_or_default();
        for required in source.specification().required() {
            if !props.contains_key(required) {
                return Err(source_error(SourceError::MissingProperty(required.clone())));
            }
        }

        let mut context = SourceContext::new(name.clone(), props);
        let metadata = source.init(&mut context).map_err(source_error)?;
        debug!(source = %name, object_type = metadata.object_type(), "source initialised");

        let recycle = context.recycle.take().map(|body| {
            let function = format!("{name}.recycle");
            functions.push(FunctionMetaData::new(function.clone(), body));
            function
        });
        let startup = std::mem::take(&mut context.startup)
            .into_iter()
            .map(|(startup, body)| {
                let function = format!("{name}.{startup}");
                functions.push(FunctionMetaData::new(function.clone(), body));
                function
            })
            .collect();

        initialised.push(InitialisedSource {
            name,
            source: Arc::from(source),
            metadata,
            recycle,
            startup,
        });
    }
    if let Some(name) = properties.keys().next() {
        return Err(EngineError::UnknownSource(name.clone()));
    }
    Ok(initialised)
}

fn resolve_bindings(
    objects: &[ObjectDeclaration],
    sources: &[InitialisedSource],
    source_index: &HashMap<&str, usize>,
    function_index: &dyn Fn(&str) -> Result<usize, EngineError>,
) -> Result<Vec<ObjectBinding>, EngineError> {
    let object_index = index_names("object", objects.iter().map(ObjectDeclaration::name))?;

    let mut bindings = Vec::with_capacity(objects.len());
    for (index, declaration) in objects.iter().enumerate() {
        let source = &sources[*source_index
            .get(declaration.source.as_str())
            .ok_or_else(|| EngineError::UnknownSource(declaration.source.clone()))?];

        let mut mapped: HashMap<&str, &str> = declaration
            .dependencies
            .iter()
            .map(|(key, object)| (key.as_str(), object.as_str()))
            .collect();
        let mut dependencies = Vec::with_capacity(source.metadata.dependency_keys().len());
        for key in source.metadata.dependency_keys() {
            let object = mapped.remove(key.as_str()).ok_or_else(|| {
                EngineError::InvalidConfig(format!(
                    "object `{}` does not map dependency `{key}` of source `{}`",
                    declaration.name, source.name
                ))
            })?;
            let dependency = *object_index
                .get(object)
                .ok_or_else(|| EngineError::UnknownObject(object.to_string()))?;
            let dependency_scope = objects[dependency].scope;
            if !declaration.scope.may_depend_on(dependency_scope) {
                return Err(EngineError::InvalidConfig(format!(
                    "{:?}-scoped object `{}` cannot depend on {:?}-scoped object `{object}`",
                    declaration.scope, declaration.name, dependency_scope
                )));
            }
            dependencies.push(dependency);
        }
        if let Some(key) = mapped.keys().next() {
            return Err(EngineError::InvalidConfig(format!(
                "source `{}` declares no dependency `{key}` (object `{}`)",
                source.name, declaration.name
            )));
        }

        let recycle = source.recycle.as_deref().map(function_index).transpose()?;
        bindings.push(ObjectBinding {
            index,
            name: declaration.name.clone(),
            scope: declaration.scope,
            source: Arc::clone(&source.source),
            object_type: source.metadata.object_type().to_string(),
            dependencies,
            pool: declaration.pool.clone(),
            recycle,
        });
    }

    check_acyclic(&bindings)?;
    Ok(bindings)
}

fn check_acyclic(bindings: &[ObjectBinding]) -> Result<(), EngineError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }

    fn visit(bindings: &[ObjectBinding], marks: &mut [Mark], index: usize) -> Result<(), EngineError> {
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                return Err(EngineError::InvalidConfig(format!(
                    "object dependency cycle through `{}`",
                    bindings[index].name
                )))
            }
            Mark::Unvisited => {}
        }
        marks[index] = Mark::Visiting;
        for &dependency in &bindings[index].dependencies {
            visit(bindings, marks, dependency)?;
        }
        marks[index] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; bindings.len()];
    for index in 0..bindings.len() {
        visit(bindings, &mut marks, index)?;
    }
    Ok(())
}

/// Append `binding` to `required` after its transitive dependencies.
fn require(bindings: &[ObjectBinding], binding: usize, required: &mut Vec<usize>, seen: &mut HashSet<usize>) {
    if !seen.insert(binding) {
        return;
    }
    for &dependency in &bindings[binding].dependencies {
        require(bindings, dependency, required, seen);
    }
    required.push(binding);
}

fn resolve_function(
    metadata: FunctionMetaData,
    bindings: &[ObjectBinding],
    object_index: &HashMap<&str, usize>,
    team_index: &HashMap<&str, usize>,
    default_team: usize,
    function_index: &dyn Fn(&str) -> Result<usize, EngineError>,
) -> Result<FunctionDefinition, EngineError> {
    let team = match &metadata.team {
        Some(name) => *team_index
            .get(name.as_str())
            .ok_or_else(|| EngineError::UnknownTeam(name.clone()))?,
        None => default_team,
    };

    let mut required = Vec::new();
    let mut seen = HashSet::new();
    let mut declared = Vec::with_capacity(metadata.objects.len());
    for name in &metadata.objects {
        let binding = *object_index
            .get(name.as_str())
            .ok_or_else(|| EngineError::UnknownObject(name.clone()))?;
        require(bindings, binding, &mut required, &mut seen);
        declared.push(binding);
    }
    let slot_of = |binding: usize| required.iter().position(|&b| b == binding);
    let object_slots = declared.iter().filter_map(|&b| slot_of(b)).collect();

    let administration = |duties: &[AdministrationDeclaration]| {
        duties
            .iter()
            .map(|duty| {
                let slots = duty
                    .objects
                    .iter()
                    .map(|object| {
                        object_index
                            .get(object.as_str())
                            .and_then(|&binding| declared.contains(&binding).then_some(binding))
                            .and_then(slot_of)
                            .ok_or_else(|| {
                                EngineError::InvalidConfig(format!(
                                    "duty `{}` of function `{}` uses object `{object}` the function does not declare",
                                    duty.name, metadata.name
                                ))
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(AdministrationDuty {
                    name: duty.name.clone(),
                    duty: Arc::clone(&duty.duty),
                    slots,
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()
    };
    let pre_administration = administration(&metadata.pre_administration)?;
    let post_administration = administration(&metadata.post_administration)?;

    let flows = metadata
        .flows
        .iter()
        .map(|(name, strategy)| {
            Ok(FlowDefinition {
                function: function_index(name.as_str())?,
                strategy: *strategy,
            })
        })
        .collect::<Result<Vec<_>, EngineError>>()?;
    let next = metadata.next.as_deref().map(function_index).transpose()?;
    let escalation_handlers = metadata
        .escalation_handlers
        .iter()
        .map(|(matcher, name)| Ok((matcher.clone(), function_index(name.as_str())?)))
        .collect::<Result<Vec<_>, EngineError>>()?;

    let body = match metadata.body {
        FunctionBody::Ready(body) => body,
        FunctionBody::Factory(factory) => factory.create_function(&FunctionLayout {
            name: metadata.name.clone(),
            objects: metadata.objects.clone(),
            flows: metadata.flows.iter().map(|(name, _)| name.clone()).collect(),
        })?,
    };

    Ok(FunctionDefinition {
        name: Arc::from(metadata.name.as_str()),
        body,
        team,
        required,
        object_slots,
        flows,
        next,
        pre_administration,
        post_administration,
        escalation_handlers,
    })
}
