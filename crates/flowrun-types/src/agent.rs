//! Agent metadata types.

use serde::{Deserialize, Serialize};

/// Optional capability metadata attached to a registered agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form capability labels (e.g. "summarize", "fetch").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    /// Config keys a step must supply when it uses this agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_config: Vec<String>,
}

/// Snapshot of a registry entry, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub metadata: AgentMetadata,
    /// Consecutive failed health checks since the last success.
    pub consecutive_failures: u32,
}
