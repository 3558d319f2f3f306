//! HttpAgent -- an [`Agent`] backed by a remote HTTP endpoint.
//!
//! Each attempt is a `POST` of the [`AgentRequest`] as JSON to the agent's
//! URL. A 2xx response must carry a JSON object, which becomes the step's
//! outputs. The health check is a `GET` on the optional health URL.

use std::time::Duration;

use flowrun_core::agent::{Agent, AgentError, AgentRequest};
use flowrun_types::workflow::OutputMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Agent that forwards invocations to `url`.
#[derive(Debug, Clone)]
pub struct HttpAgent {
    client: reqwest::Client,
    url: String,
    health_url: Option<String>,
}

impl HttpAgent {
    /// Build an agent for `url`. `timeout` bounds each HTTP request; the
    /// step timeout still applies on top.
    pub fn new(
        url: impl Into<String>,
        health_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            url: url.into(),
            health_url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, request: &AgentRequest) -> Result<OutputMap, AgentError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::Failed(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Failed(format!("HTTP {status}: {body}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::InvalidOutput(format!("response is not JSON: {e}")))?;
        parse_outputs(body)
    }
}

impl Agent for HttpAgent {
    async fn invoke(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> Result<OutputMap, AgentError> {
        tracing::debug!(
            url = %self.url,
            run_id = %request.run_id,
            step_id = %request.step_id,
            attempt = request.attempt,
            "invoking http agent"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = self.post(&request) => result,
        }
    }

    async fn health_check(&self) -> Result<(), AgentError> {
        let Some(url) = &self.health_url else {
            return Ok(());
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::Failed(format!("health check failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentError::Failed(format!(
                "health check returned HTTP {}",
                response.status()
            )))
        }
    }
}

/// Interpret an agent's response body as an output mapping.
pub fn parse_outputs(body: Value) -> Result<OutputMap, AgentError> {
    match body {
        Value::Object(outputs) => Ok(outputs),
        other => Err(AgentError::InvalidOutput(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
