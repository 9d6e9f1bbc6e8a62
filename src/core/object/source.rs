//! The managed object source contract.
//!
//! Lifecycle: [`specification`](ManagedObjectSource::specification) first,
//! then [`init`](ManagedObjectSource::init) while the engine is built,
//! [`start`](ManagedObjectSource::start) when it opens, any number of
//! [`source_managed_object`](ManagedObjectSource::source_managed_object)
//! calls, and [`stop`](ManagedObjectSource::stop) when it closes.

use std::any::Any;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::core::engine::{EngineCore, ProcessHandle, ProcessOptions};
use crate::core::function::{FnFunction, FunctionContext, ManagedFunction};
use crate::core::object::ManagedObjectUser;
use crate::core::{EngineError, Escalation, SourceError};

/// Factory for one class of external resource.
pub trait ManagedObjectSource: Send + Sync {
    /// Declared properties. Must not require prior initialisation.
    fn specification(&self) -> SourceSpecification {
        SourceSpecification::default()
    }

    /// Read properties and declare the source's metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the properties are unusable.
    fn init(&mut self, context: &mut SourceContext) -> Result<SourceMetaData, SourceError>;

    /// Called once when the engine opens; inbound flows may be invoked
    /// through `context` from now until [`stop`](Self::stop) returns.
    fn start(&self, context: ExecuteContext) {
        let _ = context;
    }

    /// Produce an object. Must eventually call exactly one of
    /// [`ManagedObjectUser::set_managed_object`] or
    /// [`ManagedObjectUser::on_failure`], from any thread.
    fn source_managed_object(&self, user: ManagedObjectUser);

    /// Called once when the engine closes.
    fn stop(&self) {}
}

/// Properties a source requires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSpecification {
    required: Vec<String>,
}

impl SourceSpecification {
    /// Empty specification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require property `name`.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Required property names.
    #[must_use]
    pub fn required(&self) -> &[String] {
        &self.required
    }
}

/// What a source declares about its objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMetaData {
    pub(crate) object_type: String,
    pub(crate) dependency_keys: Vec<String>,
    pub(crate) flow_keys: Vec<String>,
}

impl SourceMetaData {
    /// Objects of the named type.
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            ..Self::default()
        }
    }

    /// Declare a dependency key; index order is the declaration order.
    #[must_use]
    pub fn with_dependency(mut self, key: impl Into<String>) -> Self {
        self.dependency_keys.push(key.into());
        self
    }

    /// Declare an inbound flow key; index order is the declaration order.
    #[must_use]
    pub fn with_flow(mut self, key: impl Into<String>) -> Self {
        self.flow_keys.push(key.into());
        self
    }

    /// Declared object type.
    #[must_use]
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Declared dependency keys.
    #[must_use]
    pub fn dependency_keys(&self) -> &[String] {
        &self.dependency_keys
    }

    /// Declared flow keys.
    #[must_use]
    pub fn flow_keys(&self) -> &[String] {
        &self.flow_keys
    }
}

/// Passed to [`ManagedObjectSource::init`].
pub struct SourceContext {
    name: String,
    properties: HashMap<String, String>,
    pub(crate) recycle: Option<Arc<dyn ManagedFunction>>,
    pub(crate) startup: Vec<(String, Arc<dyn ManagedFunction>)>,
}

impl SourceContext {
    pub(crate) fn new(name: impl Into<String>, properties: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            properties,
            recycle: None,
            startup: Vec::new(),
        }
    }

    /// Name the source is registered under.
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.name
    }

    /// Value of property `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MissingProperty`] if it is not set.
    pub fn property(&self, name: &str) -> Result<&str, SourceError> {
        self.properties
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| SourceError::MissingProperty(name.to_string()))
    }

    /// Value of property `name`, or `default`.
    #[must_use]
    pub fn property_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.properties.get(name).map_or(default, String::as_str)
    }

    /// Parse property `name`, falling back to `default` when unset.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidProperty`] if the value does not parse.
    pub fn parse_property<T>(&self, name: &str, default: T) -> Result<T, SourceError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.properties.get(name).map_or(Ok(default), |raw| {
            raw.parse().map_err(|e: T::Err| SourceError::InvalidProperty {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
    }

    /// Register the function run to recycle this source's objects. It is
    /// registered as `"<source>.recycle"` and receives a
    /// [`RecycleManagedObjectParameter`](crate::core::object::RecycleManagedObjectParameter).
    pub fn set_recycle_function(&mut self, function: Arc<dyn ManagedFunction>) {
        self.recycle = Some(function);
    }

    /// Closure form of [`set_recycle_function`](Self::set_recycle_function).
    pub fn set_recycle_fn<F>(&mut self, f: F)
    where
        F: Fn(&mut FunctionContext) -> Result<(), Escalation> + Send + Sync + 'static,
    {
        self.set_recycle_function(Arc::new(FnFunction::new(f)));
    }

    /// Register a function invoked as its own process when the engine opens.
    /// It is registered as `"<source>.<name>"`.
    pub fn add_startup_function(&mut self, name: impl Into<String>, function: Arc<dyn ManagedFunction>) {
        self.startup.push((name.into(), function));
    }
}

pub(crate) struct ExecuteState {
    pub source: String,
    pub flows: Vec<usize>,
    pub core: OnceLock<Weak<EngineCore>>,
    pub stopped: AtomicBool,
}

/// Handle through which a started source invokes its inbound flows.
#[derive(Clone)]
pub struct ExecuteContext {
    state: Arc<ExecuteState>,
}

impl ExecuteContext {
    pub(crate) const fn new(state: Arc<ExecuteState>) -> Self {
        Self { state }
    }

    /// Number of declared flows.
    #[must_use]
    pub fn flow_count(&self) -> usize {
        self.state.flows.len()
    }

    /// Start a new process at the function linked to flow `flow`.
    ///
    /// # Errors
    ///
    /// Returns an error once the source is stopped or the engine is closed,
    /// or if `flow` is not declared.
    pub fn invoke_process<P: Any + Send + Sync>(
        &self,
        flow: usize,
        parameter: P,
    ) -> Result<ProcessHandle, EngineError> {
        self.invoke_process_with(flow, Some(Arc::new(parameter)), ProcessOptions::default())
    }

    /// As [`invoke_process`](Self::invoke_process) with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an error once the source is stopped or the engine is closed,
    /// or if `flow` is not declared.
    pub fn invoke_process_with(
        &self,
        flow: usize,
        parameter: Option<crate::core::function::Parameter>,
        options: ProcessOptions,
    ) -> Result<ProcessHandle, EngineError> {
        if self.state.stopped.load(Ordering::Acquire) {
            return Err(EngineError::SourceStopped(self.state.source.clone()));
        }
        let function = *self.state.flows.get(flow).ok_or_else(|| {
            EngineError::InvalidConfig(format!(
                "source `{}` has no flow at index {flow}",
                self.state.source
            ))
        })?;
        let core = self
            .state
            .core
            .get()
            .and_then(Weak::upgrade)
            .ok_or(EngineError::NotOpen)?;
        core.start_process(function, parameter, options)
    }
}
