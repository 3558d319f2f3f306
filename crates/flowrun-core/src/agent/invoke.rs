//! The agent contract.
//!
//! An agent's internals are opaque to the core. It receives an `AgentRequest`
//! and a cancellation token, and answers with an output mapping or an error.

use flowrun_types::workflow::{ConfigMap, OutputMap};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything an agent is given for one attempt of one step.
///
/// Static config, bound input, and run input are kept apart: nothing is
/// merged, so a config key never shadows an upstream output of the same name.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub run_id: Uuid,
    pub step_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// The step's static `config` block.
    pub config: ConfigMap,
    /// Full outputs of the `input_from` step. `None` for root steps.
    pub input: Option<OutputMap>,
    /// The run's initial input.
    pub run_input: serde_json::Value,
}

/// Failure reported by an agent.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// The agent tried and failed. Subject to retry.
    #[error("{0}")]
    Failed(String),

    /// The agent answered with something that is not an output mapping.
    #[error("invalid output: {0}")]
    InvalidOutput(String),

    /// The agent observed the cancellation token and stopped.
    #[error("invocation cancelled")]
    Cancelled,
}

/// A named executor capable of performing a step's work.
///
/// Uses RPITIT for async methods. For runtime selection behind a registry,
/// wrap implementations in [`BoxAgent`](super::BoxAgent).
pub trait Agent: Send + Sync {
    /// Perform one attempt.
    ///
    /// Implementations should stop promptly once `cancel` fires. The executor
    /// stops waiting on timeout or run cancellation either way.
    fn invoke(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Result<OutputMap, AgentError>> + Send;

    /// Liveness check. Agents without a meaningful check are always healthy.
    fn health_check(&self) -> impl std::future::Future<Output = Result<(), AgentError>> + Send {
        async { Ok(()) }
    }
}
