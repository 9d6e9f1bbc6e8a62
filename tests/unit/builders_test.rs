//! Tests for builder modules

use std::sync::Arc;

use prometheus_function_engine::builders::{build_team, build_teams, EngineBuilder};
use prometheus_function_engine::config::{EngineConfig, TeamConfig, TeamKind};
use prometheus_function_engine::core::{
    EngineError, FunctionMetaData, ManagedObjectUser, ObjectDeclaration,
};
use prometheus_function_engine::infra::{FnSource, PassiveTeam};

#[test]
fn test_build_team_by_kind() {
    let passive = build_team("inline", &TeamConfig::new(TeamKind::Passive)).unwrap();
    assert_eq!(passive.name(), "inline");
    assert_eq!(passive.stats().worker_count, 0);

    let pool = build_team("pool", &TeamConfig::new(TeamKind::WorkerPool).with_worker_count(3)).unwrap();
    assert_eq!(pool.stats().worker_count, 3);

    let solo = build_team("solo", &TeamConfig::new(TeamKind::OnePerson).with_worker_count(8)).unwrap();
    assert_eq!(solo.stats().worker_count, 1);
}

#[test]
fn test_build_teams_sorted_by_name() {
    let json = r#"{"teams": {"zeta": {"kind": "passive"}, "alpha": {"kind": "passive"}}, "default_team": "zeta"}"#;
    let config = EngineConfig::from_json_str(json).unwrap();
    let teams = build_teams(&config).unwrap();
    let names: Vec<_> = teams.iter().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}

#[test]
fn test_engine_builder_defaults_to_passive_team() {
    let engine = EngineBuilder::new()
        .with_function(FunctionMetaData::from_fn("noop", |_ctx| Ok(())))
        .build()
        .unwrap();
    assert!(engine.team_stats("passive").is_some());
    assert_eq!(engine.function_names(), vec!["noop"]);
}

#[test]
fn test_engine_builder_rejects_duplicate_team() {
    let result = EngineBuilder::new()
        .with_team(PassiveTeam::new("same"))
        .with_shared_team(Arc::new(PassiveTeam::new("same")))
        .build();
    assert!(matches!(result, Err(EngineError::Duplicate { kind: "team", .. })));
}

#[test]
fn test_engine_builder_rejects_unknown_object() {
    let result = EngineBuilder::new()
        .with_function(FunctionMetaData::from_fn("use", |_ctx| Ok(())).with_object("missing"))
        .build();
    assert!(matches!(result, Err(EngineError::UnknownObject(ref name)) if name == "missing"));
}

#[test]
fn test_engine_builder_rejects_unknown_source() {
    let result = EngineBuilder::new()
        .with_object(ObjectDeclaration::new("db", "nowhere"))
        .build();
    assert!(matches!(result, Err(EngineError::UnknownSource(ref name)) if name == "nowhere"));
}

#[test]
fn test_engine_builder_requires_dependency_mapping() {
    let source = FnSource::new("client", |_user: &ManagedObjectUser| Ok(1_u8))
        .with_dependency("settings");
    let result = EngineBuilder::new()
        .with_source("clients", source)
        .with_object(ObjectDeclaration::new("client", "clients"))
        .build();
    assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
}
