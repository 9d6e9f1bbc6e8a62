//! Infrastructure: teams, managed object pools and sources.

pub mod pool;
pub mod source;
pub mod team;

pub use pool::{BoundedObjectPool, ObjectPoolStats};
pub use source::{
    begin_transaction, commit_transaction, Connection, ConnectionSource, FnSource,
    InMemoryConnection, PooledConnection, SingletonSource,
};
pub use team::{PassiveTeam, ThreadPerJobTeam, WorkerPoolTeam};
