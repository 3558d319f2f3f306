//! Engine configuration types.
//!
//! `EngineConfig` represents the `config.toml` in the data directory. It
//! controls retry and timeout defaults, per-run limits, health probing, and
//! which agents are wired up at start.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts per step when the step has no `retry.max_attempts`.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub default_initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub default_max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub default_backoff_multiplier: f64,

    /// Per-attempt timeout when the step has no `timeout_secs`.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,

    /// Cap on concurrently in-flight steps per run. Unset means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_steps: Option<usize>,

    /// Per-run broadcast buffer; a subscriber further behind is disconnected.
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,

    /// Consecutive failed health checks before an agent is deregistered.
    #[serde(default = "default_health_failure_threshold")]
    pub health_failure_threshold: u32,

    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    /// How long a cancelled or timed-out agent gets to return before its
    /// invocation is dropped.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Finished runs kept for status queries and replay. Older finished runs
    /// are forgotten as new runs are created.
    #[serde(default = "default_max_retained_runs")]
    pub max_retained_runs: usize,

    /// Agents to register at start.
    #[serde(default)]
    pub agents: Vec<AgentConfigEntry>,

    /// Directory of workflow files registered at start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_dir: Option<PathBuf>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_event_buffer_capacity() -> usize {
    256
}

fn default_health_failure_threshold() -> u32 {
    3
}

fn default_health_check_timeout_ms() -> u64 {
    2_000
}

fn default_cancel_grace_ms() -> u64 {
    500
}

fn default_max_retained_runs() -> usize {
    1_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: default_max_attempts(),
            default_initial_backoff_ms: default_initial_backoff_ms(),
            default_max_backoff_ms: default_max_backoff_ms(),
            default_backoff_multiplier: default_backoff_multiplier(),
            default_step_timeout_secs: default_step_timeout_secs(),
            max_parallel_steps: None,
            event_buffer_capacity: default_event_buffer_capacity(),
            health_failure_threshold: default_health_failure_threshold(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            max_retained_runs: default_max_retained_runs(),
            agents: Vec::new(),
            workflow_dir: None,
        }
    }
}

/// How a configured agent is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Returns its config and input as outputs.
    Echo,
    /// POSTs invocations to `url`.
    Http,
}

/// One `[[agents]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfigEntry {
    pub name: String,
    pub kind: AgentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,
    /// HTTP client timeout; the step timeout still applies on top.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub required_config: Vec<String>,
}
