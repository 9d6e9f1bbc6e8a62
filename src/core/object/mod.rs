//! Managed objects: externally sourced resources bound to a scope.
//!
//! A [`ManagedObjectSource`] produces objects asynchronously through a
//! [`ManagedObjectUser`]; a [`ManagedObjectContainer`] holds the sourced
//! instance for one process, thread or function execution and recycles it at
//! scope teardown.

pub mod binding;
pub mod container;
pub mod pool;
pub mod recycle;
pub mod registry;
pub mod source;
pub mod user;

use std::any::Any;
use std::sync::Arc;

pub use binding::{ObjectDeclaration, ObjectScope};
pub use container::{ContainerStatus, ManagedObjectContainer};
pub use pool::ManagedObjectPool;
pub use recycle::RecycleManagedObjectParameter;
pub use source::{
    ExecuteContext, ManagedObjectSource, SourceContext, SourceMetaData, SourceSpecification,
};
pub use user::ManagedObjectUser;

pub(crate) use binding::ObjectBinding;
pub(crate) use container::Acquire;
pub(crate) use recycle::RecycleBatch;
pub(crate) use registry::SourceRegistry;

/// A sourced resource instance, shared by every job reading its container.
pub type ManagedObject = Arc<dyn Any + Send + Sync>;
