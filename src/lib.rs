//! # Prometheus Function Engine
//!
//! A cooperative function execution engine. Managed functions are scheduled
//! across named teams of workers, their managed objects are sourced
//! asynchronously and recycled when their scope ends, and failures are
//! walked up an explicit escalation chain.
//!
//! ## Execution Model
//!
//! - **Process**: one external trigger. Owns process-scoped objects and the
//!   top-level escalation handler; completes when its last thread does.
//! - **Thread**: a logical thread inside a process, serviced by whichever
//!   team thread runs its next job. Thread-affine state travels with it
//!   through thread synchronisers.
//! - **Job**: one function invocation. Jobs park inside a managed object
//!   container while its object is being sourced, and are re-assigned to
//!   their team when sourcing resolves.
//! - **Flows**: a function may continue sequentially, start a parallel
//!   chain on its thread, or spawn a new thread; flow callbacks run once the
//!   flow's chain ends.
//!
//! ## Key Features
//!
//! - **Teams**: passive (caller's thread), dedicated worker pools,
//!   thread-per-job, and tokio blocking pools
//! - **At-most-one sourcing** per container; failures fail every waiter
//! - **Recycling** through ordinary managed functions, with cleanup
//!   failures collected per teardown batch
//! - **Bounded object pools** with idle reuse and parked users
//! - **Escalation chain**: function handlers, flow callbacks and boundaries,
//!   engine escalation flows, process handler, terminal handler
//!
//! ```rust,ignore
//! use prometheus_function_engine::builders::EngineBuilder;
//! use prometheus_function_engine::core::{FlowStrategy, FunctionMetaData};
//! use prometheus_function_engine::infra::WorkerPoolTeam;
//! use std::time::Duration;
//!
//! let engine = EngineBuilder::new()
//!     .with_team(WorkerPoolTeam::one_person("main"))
//!     .with_function(FunctionMetaData::from_fn("greet", |ctx| {
//!         println!("hello {}", ctx.parameter::<String>().unwrap());
//!         Ok(())
//!     }))
//!     .build()?;
//! engine.open()?;
//! let outcome = engine.invoke_process("greet", "world".to_string())?.wait(Duration::from_secs(1))?;
//! assert!(outcome.is_completed());
//! ```
//!
//! For complete examples, see:
//! - `tests/engine_flow_test.rs` - Flow and escalation scenarios
//! - `tests/managed_object_test.rs` - Sourcing, pooling and recycling

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core engine: functions, jobs, containers, states, teams and escalations.
pub mod core;
/// Configuration models for teams and the engine.
pub mod config;
/// Builders to construct teams and engines.
pub mod builders;
/// Infrastructure: team implementations, object pools and sources.
pub mod infra;
/// Tokio runtime adapters.
#[cfg(feature = "tokio-runtime")]
pub mod runtime;
/// Shared utilities.
pub mod util;
