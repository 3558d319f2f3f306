//! Workflow execution core for flowrun.
//!
//! Depends only on `flowrun-types` -- never on `flowrun-infra` or any
//! network/filesystem adapter beyond reading workflow files.
//!
//! - `agent` -- agent contract, type-erased handle, registry, built-in echo agent
//! - `event` -- per-run ordered event broadcaster with replay
//! - `workflow` -- loader/validation, step graph, catalog, retry policy,
//!   step executor, DAG scheduler, engine facade

pub mod agent;
pub mod event;
pub mod workflow;
