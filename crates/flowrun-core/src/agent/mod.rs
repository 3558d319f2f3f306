//! Agents: the pluggable executors that perform a step's work.
//!
//! - `invoke` -- the `Agent` trait and the request/error types
//! - `box_agent` -- object-safe wrapper for runtime-selected agents
//! - `registry` -- concurrent name -> agent mapping with health tracking
//! - `builtin` -- `EchoAgent`

pub mod box_agent;
pub mod builtin;
pub mod invoke;
pub mod registry;

pub use box_agent::BoxAgent;
pub use builtin::EchoAgent;
pub use invoke::{Agent, AgentError, AgentRequest};
pub use registry::{AgentRegistry, RegisterMode, RegistryError};
