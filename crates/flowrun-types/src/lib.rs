//! Shared domain types for flowrun.
//!
//! This crate contains the types exchanged between the execution core, the
//! infrastructure adapters, and the API layer: workflow definitions, run and
//! step state, lifecycle events, agent metadata, and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod run;
pub mod workflow;
