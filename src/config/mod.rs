//! Configuration models for teams and the engine.

pub mod engine;

pub use engine::{EngineConfig, TeamConfig, TeamKind, CONFIG_ENV_VAR};
