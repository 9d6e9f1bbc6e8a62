//! Error types for engine construction and lifecycle operations.

use thiserror::Error;

/// Errors produced while building, opening or driving a `FunctionEngine`.
///
/// Runtime failures inside functions are not errors of this type; they are
/// [`Escalation`](crate::core::Escalation)s walked up the handler chain.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A function name was referenced but never registered.
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    /// A team name was referenced but never registered.
    #[error("unknown team: {0}")]
    UnknownTeam(String),
    /// An object binding name was referenced but never registered.
    #[error("unknown managed object: {0}")]
    UnknownObject(String),
    /// A managed object source name was referenced but never registered.
    #[error("unknown managed object source: {0}")]
    UnknownSource(String),
    /// Two entries of the same kind share a name.
    #[error("duplicate {kind} name: {name}")]
    Duplicate {
        /// Kind of entry (function, team, object, source).
        kind: &'static str,
        /// Offending name.
        name: String,
    },
    /// Declared graph is inconsistent (bad index, cycle, missing mapping).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A managed object source failed during specification or init.
    #[error("managed object source `{name}` failed: {source}")]
    Source {
        /// Source name.
        name: String,
        /// Underlying failure.
        #[source]
        source: SourceError,
    },
    /// A team failed to start.
    #[error("team `{name}` failed to start: {reason}")]
    TeamStart {
        /// Team name.
        name: String,
        /// Failure description.
        reason: String,
    },
    /// The engine is not open (never opened, or already closed).
    #[error("engine is not open")]
    NotOpen,
    /// The managed object source was stopped; inbound flows are refused.
    #[error("managed object source `{0}` is stopped")]
    SourceStopped(String),
    /// Waiting on a process exceeded the given timeout.
    #[error("timed out waiting for process completion")]
    Timeout,
}

/// Errors raised by managed object sources.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// A required property was not supplied.
    #[error("missing required property `{0}`")]
    MissingProperty(String),
    /// A property value could not be interpreted.
    #[error("invalid property `{name}`: {reason}")]
    InvalidProperty {
        /// Property name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// The source could not produce an object.
    #[error("sourcing failed: {0}")]
    Failed(String),
    /// The requested operation is not permitted on the wrapped resource.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
