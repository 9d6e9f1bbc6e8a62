//! Engine and team configuration structures.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, StopPolicy};

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "FUNCTION_ENGINE_CONFIG";

/// Team implementation selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamKind {
    /// Runs jobs synchronously on the assigning thread.
    Passive,
    /// A single dedicated worker thread.
    OnePerson,
    /// A fixed pool of dedicated worker threads.
    WorkerPool,
    /// A fresh OS thread per job.
    ThreadPerJob,
    /// The blocking pool of a tokio runtime.
    Tokio,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

const fn default_stack_size() -> usize {
    2 * 1024 * 1024
}

const fn default_stop_timeout_ms() -> u64 {
    2_000
}

/// Team configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Implementation.
    pub kind: TeamKind,
    /// Worker threads (worker pool and tokio teams).
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Maximum queued jobs; `None` means unbounded.
    #[serde(default)]
    pub max_queue_depth: Option<usize>,
    /// Stack size of dedicated worker threads.
    #[serde(default = "default_stack_size")]
    pub thread_stack_size: usize,
    /// How long `stop_working` waits for in-flight jobs.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// What a stopping team does with queued jobs.
    #[serde(default)]
    pub stop_policy: StopPolicy,
}

impl TeamConfig {
    /// Configuration of the given kind with defaults.
    #[must_use]
    pub fn new(kind: TeamKind) -> Self {
        Self {
            kind,
            worker_count: default_worker_count(),
            max_queue_depth: None,
            thread_stack_size: default_stack_size(),
            stop_timeout_ms: default_stop_timeout_ms(),
            stop_policy: StopPolicy::default(),
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Bound the job queue.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Set the stop timeout.
    #[must_use]
    pub const fn with_stop_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stop_timeout_ms = timeout_ms;
        self
    }

    /// Set the stop policy.
    #[must_use]
    pub const fn with_stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    /// Validate team configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        let threaded = matches!(self.kind, TeamKind::WorkerPool | TeamKind::Tokio);
        if threaded && self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == Some(0) {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.stop_timeout_ms == 0 {
            return Err("stop_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Map of team name to configuration.
    pub teams: HashMap<String, TeamConfig>,
    /// Team for functions that do not name one.
    pub default_team: String,
}

impl EngineConfig {
    /// Validate all teams and the default team reference.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.teams.is_empty() {
            return Err("at least one team must be defined".into());
        }
        if !self.teams.contains_key(&self.default_team) {
            return Err(format!("default_team `{}` is not defined", self.default_team));
        }
        for (name, team) in &self.teams {
            team.validate()
                .map_err(|e| format!("team `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        Self::from_json_str(&input)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading engine config {}", path.display()))
    }

    /// Load `.env` (if present), then the file named by `FUNCTION_ENGINE_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or the file is invalid.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let path = std::env::var(CONFIG_ENV_VAR)
            .with_context(|| format!("{CONFIG_ENV_VAR} is not set"))?;
        Self::from_file(path)
    }
}

impl Default for EngineConfig {
    /// A single passive team named `passive`.
    fn default() -> Self {
        Self {
            teams: HashMap::from([("passive".to_string(), TeamConfig::new(TeamKind::Passive))]),
            default_team: "passive".to_string(),
        }
    }
}
