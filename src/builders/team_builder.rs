//! Builders to construct teams from configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{EngineConfig, TeamConfig, TeamKind};
use crate::core::{EngineError, Team};
use crate::infra::{PassiveTeam, ThreadPerJobTeam, WorkerPoolTeam};

/// Build every configured team, ordered by name.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or a team cannot be
/// created.
pub fn build_teams(cfg: &EngineConfig) -> Result<Vec<Arc<dyn Team>>, EngineError> {
    cfg.validate()
        .map_err(|e| EngineError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut names: Vec<&String> = cfg.teams.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| build_team(name, &cfg.teams[name]))
        .collect()
}

/// Build one team from its configuration.
///
/// # Errors
///
/// Returns an error if the team cannot be created.
pub fn build_team(name: &str, cfg: &TeamConfig) -> Result<Arc<dyn Team>, EngineError> {
    let invalid = |e: crate::core::TeamError| EngineError::InvalidConfig(format!("team `{name}`: {e}"));
    let team: Arc<dyn Team> = match cfg.kind {
        TeamKind::Passive => Arc::new(PassiveTeam::new(name)),
        TeamKind::OnePerson | TeamKind::WorkerPool => {
            Arc::new(WorkerPoolTeam::new(name, cfg.clone()).map_err(invalid)?)
        }
        TeamKind::ThreadPerJob => Arc::new(ThreadPerJobTeam::new(
            name,
            cfg.thread_stack_size,
            Duration::from_millis(cfg.stop_timeout_ms),
        )),
        #[cfg(feature = "tokio-runtime")]
        TeamKind::Tokio => Arc::new(crate::runtime::TokioTeam::from_config(name, cfg).map_err(invalid)?),
        #[cfg(not(feature = "tokio-runtime"))]
        TeamKind::Tokio => {
            return Err(EngineError::InvalidConfig(format!(
                "team `{name}`: tokio teams require the `tokio-runtime` feature"
            )))
        }
    };
    Ok(team)
}
