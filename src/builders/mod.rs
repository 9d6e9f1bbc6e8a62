//! Builders: teams from configuration, and the engine itself.

pub mod engine_builder;
pub mod team_builder;

pub use engine_builder::EngineBuilder;
pub use team_builder::{build_team, build_teams};
