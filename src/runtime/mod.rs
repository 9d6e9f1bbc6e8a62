//! Tokio runtime adapters: a spawner, a team running jobs on the blocking
//! pool, and an async sourcing adapter.

pub mod async_source;
pub mod tokio_spawner;
pub mod tokio_team;

pub use async_source::{AsyncManagedObjectSource, AsyncObjectFactory};
pub use tokio_spawner::TokioSpawner;
pub use tokio_team::TokioTeam;
