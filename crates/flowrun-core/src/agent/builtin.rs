//! Built-in agents.

use flowrun_types::workflow::OutputMap;
use tokio_util::sync::CancellationToken;

use super::invoke::{Agent, AgentError, AgentRequest};

/// Returns its static config followed by its bound input as outputs.
///
/// Bound input keys win over config keys of the same name. Useful for dry
/// runs of a workflow before real agents exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAgent;

impl Agent for EchoAgent {
    async fn invoke(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> Result<OutputMap, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let mut outputs = request.config;
        if let Some(input) = request.input {
            outputs.extend(input);
        }
        Ok(outputs)
    }
}
