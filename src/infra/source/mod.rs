//! Managed object source implementations.

pub mod connection;
pub mod fn_source;

pub use connection::{
    begin_transaction, commit_transaction, Connection, ConnectionSource, InMemoryConnection,
    PooledConnection, URL_PROPERTY,
};
pub use fn_source::{FnSource, SingletonSource};
