//! Tests for configuration validation

use prometheus_function_engine::config::{EngineConfig, TeamConfig, TeamKind};
use prometheus_function_engine::core::StopPolicy;

#[test]
fn test_team_config_validation() {
    let valid = TeamConfig::new(TeamKind::WorkerPool)
        .with_worker_count(4)
        .with_max_queue_depth(50);
    assert!(valid.validate().is_ok());
}

#[test]
fn test_team_config_invalid_queue_depth() {
    let invalid = TeamConfig::new(TeamKind::WorkerPool).with_max_queue_depth(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_team_config_invalid_stack_size() {
    let invalid = TeamConfig::new(TeamKind::ThreadPerJob).with_thread_stack_size(1024);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_team_config_invalid_timeout() {
    let invalid = TeamConfig::new(TeamKind::OnePerson).with_stop_timeout_ms(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_engine_config_validation() {
    let mut config = EngineConfig::default();
    assert!(config.validate().is_ok());

    config
        .teams
        .insert("workers".to_string(), TeamConfig::new(TeamKind::WorkerPool).with_worker_count(0));
    let err = config.validate().unwrap_err();
    assert!(err.contains("workers"));
}

#[test]
fn test_engine_config_empty_teams() {
    let config = EngineConfig {
        teams: std::collections::HashMap::new(),
        default_team: "passive".to_string(),
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_engine_config_from_json() {
    let json = r#"{
        "teams": {
            "io": {
                "kind": "worker_pool",
                "worker_count": 8,
                "max_queue_depth": 100,
                "stop_policy": "abandon"
            },
            "inline": { "kind": "passive" }
        },
        "default_team": "io"
    }"#;

    let config = EngineConfig::from_json_str(json).unwrap();
    assert_eq!(config.teams.len(), 2);
    let io = &config.teams["io"];
    assert_eq!(io.kind, TeamKind::WorkerPool);
    assert_eq!(io.worker_count, 8);
    assert_eq!(io.max_queue_depth, Some(100));
    assert_eq!(io.stop_policy, StopPolicy::Abandon);
    assert_eq!(config.teams["inline"].kind, TeamKind::Passive);
}

#[test]
fn test_engine_config_from_json_rejects_unknown_kind() {
    let json = r#"{"teams": {"x": {"kind": "fibers"}}, "default_team": "x"}"#;
    assert!(EngineConfig::from_json_str(json).unwrap_err().contains("parse error"));
}

#[test]
fn test_engine_config_from_file() {
    let path = std::env::temp_dir().join(format!("engine-config-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{"teams": {"solo": {"kind": "one_person"}}, "default_team": "solo"}"#,
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.default_team, "solo");
    assert_eq!(config.teams["solo"].kind, TeamKind::OnePerson);

    std::fs::remove_file(&path).unwrap();
    assert!(EngineConfig::from_file(&path).is_err());
}
