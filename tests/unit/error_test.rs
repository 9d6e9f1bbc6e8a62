//! Tests for error types and escalations

use prometheus_function_engine::core::{
    EngineError, Escalation, EscalationKind, SourceError, TeamError,
};

#[test]
fn test_unknown_function_error() {
    let err = EngineError::UnknownFunction("load".to_string());
    assert_eq!(format!("{}", err), "unknown function: load");
}

#[test]
fn test_duplicate_error() {
    let err = EngineError::Duplicate {
        kind: "team",
        name: "workers".to_string(),
    };
    assert_eq!(format!("{}", err), "duplicate team name: workers");
}

#[test]
fn test_source_error_is_chained() {
    let err = EngineError::Source {
        name: "database".to_string(),
        source: SourceError::MissingProperty("url".to_string()),
    };
    assert_eq!(
        format!("{}", err),
        "managed object source `database` failed: missing required property `url`"
    );
    let source = std::error::Error::source(&err).expect("source error");
    assert_eq!(source.to_string(), "missing required property `url`");
}

#[test]
fn test_team_error_display() {
    assert_eq!(format!("{}", TeamError::QueueFull), "team queue is full");
    assert_eq!(format!("{}", TeamError::Stopped), "team has stopped working");
}

#[test]
fn test_sourcing_escalation_carries_object_name() {
    let escalation = Escalation::sourcing("db", &SourceError::Failed("refused".to_string()));
    assert_eq!(escalation.kind(), EscalationKind::Sourcing);
    assert_eq!(escalation.label(), "db");
    assert_eq!(escalation.message(), "sourcing failed: refused");
}

#[test]
fn test_rejected_escalation_names_team() {
    let escalation = Escalation::rejected("workers", TeamError::QueueFull);
    assert_eq!(escalation.kind(), EscalationKind::Rejected);
    assert_eq!(escalation.label(), "workers");
    assert!(escalation.message().contains("team queue is full"));
}
