//! Team implementations.

pub mod passive;
pub mod thread_per_job;
pub mod worker_pool;

pub use passive::PassiveTeam;
pub use thread_per_job::ThreadPerJobTeam;
pub use worker_pool::WorkerPoolTeam;
