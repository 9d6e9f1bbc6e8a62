//! Escalations and the handlers they are walked through.
//!
//! An [`Escalation`] is the value a failing function, administration duty,
//! managed object source or flow callback produces. Propagation is explicit:
//! the job walks its own declared handlers, then its chain's continuation
//! stack, then the engine's escalation flows, then the process handler and
//! finally the [`TerminalEscalationHandler`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::SourceError;
use crate::util::ProcessId;

/// Category of an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    /// A managed object source could not produce its object.
    Sourcing,
    /// A function body failed or panicked.
    Execution,
    /// A pre- or post-administration duty failed.
    Administration,
    /// A collaborator broke its contract (e.g. a source calling back twice).
    ContractViolation,
    /// A team refused a job.
    Rejected,
    /// The chain was abandoned (process torn down or team stopped).
    Abandoned,
}

impl EscalationKind {
    /// Stable snake_case label for logs and audit records.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Sourcing => "sourcing",
            Self::Execution => "execution",
            Self::Administration => "administration",
            Self::ContractViolation => "contract_violation",
            Self::Rejected => "rejected",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for EscalationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A typed failure propagated up the execution hierarchy.
///
/// The `label` plays the role of the failure's type: handlers select the
/// escalations they accept by kind or by label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} escalation `{label}`: {message}")]
pub struct Escalation {
    kind: EscalationKind,
    label: String,
    message: String,
}

impl Escalation {
    /// An execution escalation raised by a function body.
    pub fn new(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_kind(EscalationKind::Execution, label, message)
    }

    /// An escalation of an explicit kind.
    pub fn with_kind(
        kind: EscalationKind,
        label: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            label: label.into(),
            message: message.into(),
        }
    }

    /// Sourcing failure of the named managed object.
    pub fn sourcing(object: impl Into<String>, error: &SourceError) -> Self {
        Self::with_kind(EscalationKind::Sourcing, object, error.to_string())
    }

    /// Failure of an administration duty.
    pub fn administration(duty: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_kind(EscalationKind::Administration, duty, message)
    }

    /// A collaborator broke its contract.
    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::with_kind(EscalationKind::ContractViolation, "contract_violation", message)
    }

    /// A team refused to accept a job.
    pub fn rejected(team: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::with_kind(EscalationKind::Rejected, team, reason.to_string())
    }

    /// The chain was abandoned before completing.
    pub fn abandoned(reason: impl Into<String>) -> Self {
        Self::with_kind(EscalationKind::Abandoned, "abandoned", reason)
    }

    /// Convert a caught panic payload into an execution escalation.
    #[must_use]
    pub fn panicked(origin: &str, payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::with_kind(EscalationKind::Execution, "panic", format!("{origin}: {message}"))
    }

    /// Category of this escalation.
    #[must_use]
    pub const fn kind(&self) -> EscalationKind {
        self.kind
    }

    /// Type label of this escalation.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Human-readable detail.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the label equals `label`.
    #[must_use]
    pub fn is(&self, label: &str) -> bool {
        self.label == label
    }
}

/// Selects the escalations a handler accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationMatcher {
    /// Every escalation.
    Any,
    /// Escalations of one kind.
    Kind(EscalationKind),
    /// Escalations with an exact label.
    Label(String),
}

impl EscalationMatcher {
    /// Matcher for an exact label.
    pub fn label(label: impl Into<String>) -> Self {
        Self::Label(label.into())
    }

    /// Whether this matcher accepts `escalation`.
    #[must_use]
    pub fn matches(&self, escalation: &Escalation) -> bool {
        match self {
            Self::Any => true,
            Self::Kind(kind) => escalation.kind == *kind,
            Self::Label(label) => escalation.label == *label,
        }
    }
}

/// Top-level escalation handler of a process.
///
/// Returning `Err` means the handler could not deal with the escalation; the
/// returned escalation then goes to the terminal handler.
pub trait EscalationHandler: Send + Sync {
    /// Handle an escalation that no function-level handler accepted.
    ///
    /// # Errors
    ///
    /// Returns the escalation to pass on when it cannot be handled.
    fn handle_escalation(&self, escalation: &Escalation) -> Result<(), Escalation>;
}

impl<F> EscalationHandler for F
where
    F: Fn(&Escalation) -> Result<(), Escalation> + Send + Sync,
{
    fn handle_escalation(&self, escalation: &Escalation) -> Result<(), Escalation> {
        self(escalation)
    }
}

/// Reporting sink for escalations nothing else handled.
///
/// By the time this runs the process is being torn down; it is not a
/// recovery mechanism.
pub trait TerminalEscalationHandler: Send + Sync {
    /// Report an unhandled escalation of `process`.
    fn escalation_unhandled(&self, process: ProcessId, escalation: &Escalation);
}

impl<F> TerminalEscalationHandler for F
where
    F: Fn(ProcessId, &Escalation) + Send + Sync,
{
    fn escalation_unhandled(&self, process: ProcessId, escalation: &Escalation) {
        self(process, escalation);
    }
}

/// Default terminal handler: logs the escalation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTerminalHandler;

impl TerminalEscalationHandler for LoggingTerminalHandler {
    fn escalation_unhandled(&self, process: ProcessId, escalation: &Escalation) {
        tracing::error!(
            process_id = %process,
            kind = %escalation.kind(),
            label = escalation.label(),
            "unhandled escalation: {}",
            escalation.message()
        );
    }
}

/// Failure captured while recycling a managed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupEscalation {
    /// Name of the object binding being recycled.
    pub object_name: String,
    /// Type name declared by the object's source.
    pub object_type: String,
    /// The captured escalation.
    pub escalation: Escalation,
}

/// Shared, append-only list of a teardown batch's cleanup escalations.
pub(crate) type CleanupLog = Arc<parking_lot::Mutex<Vec<CleanupEscalation>>>;
