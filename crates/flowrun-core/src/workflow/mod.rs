//! Workflow engine core: definition loading, DAG scheduling, and step execution.
//!
//! - `definition` -- YAML parsing, exhaustive validation, filesystem load/save
//! - `graph` -- petgraph view of step dependencies (dependents, waves)
//! - `catalog` -- named workflow registrations, including invalid ones
//! - `retry` -- retry policy resolution and backoff computation
//! - `step_executor` -- one step: timeout, retries, cancellation
//! - `runner` -- per-run scheduling loop (`RunScheduler` / `DagRunner`)
//! - `engine` -- run control surface: create, status, cancel, subscribe

pub mod catalog;
pub mod definition;
pub mod engine;
pub mod graph;
pub mod retry;
pub mod runner;
pub mod step_executor;

pub use catalog::{CatalogEntry, WorkflowCatalog};
pub use definition::WorkflowError;
pub use engine::{EngineError, WorkflowEngine};
pub use runner::{DagRunner, RunContext, RunScheduler};
pub use step_executor::StepExecutor;
