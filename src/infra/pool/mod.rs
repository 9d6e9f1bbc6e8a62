//! Managed object pool implementations.

pub mod bounded;

pub use bounded::{BoundedObjectPool, ObjectPoolStats};
