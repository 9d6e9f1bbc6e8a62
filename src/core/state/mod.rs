//! Process and thread states: the execution context hierarchy.
//!
//! A [`ProcessState`] owns process-scoped containers and counts its
//! outstanding [`ThreadState`]s. A thread state owns thread-scoped containers,
//! one synchroniser per registered factory and a count of active chains.

pub mod process;
pub mod thread;

pub use process::{ProcessPhase, ProcessState};
pub use thread::{ThreadKind, ThreadState, ThreadStatus};
