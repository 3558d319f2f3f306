//! Workflow definition types.
//!
//! Two shapes live here:
//! - `WorkflowDocument` -- the declarative file format (`workflow` header block
//!   plus a `steps` list). Fields that validation reports on are optional so a
//!   missing key surfaces as a validation issue instead of a parse failure.
//! - `WorkflowDefinition` -- the validated, immutable in-memory form that the
//!   scheduler executes.

use serde::{Deserialize, Serialize};

/// Opaque key -> value options passed to an agent, and the shape of step outputs.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Mapping of declared output name -> value produced by a step.
pub type OutputMap = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Document (file format)
// ---------------------------------------------------------------------------

/// A workflow file as written by users.
///
/// ```yaml
/// workflow:
///   name: content-pipeline
///   version: "1.0"
///   description: Ingest then digest
/// steps:
///   - id: ingest
///     agent: ingest_agent
///     config: { source: inbox }
///     outputs: [content_id, content_type]
///   - id: digest
///     agent: digest_agent
///     input_from: ingest
///     outputs: [digest, summary_count]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default)]
    pub workflow: Option<WorkflowHeader>,
    #[serde(default)]
    pub steps: Vec<StepDocument>,
}

/// The top-level `workflow` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowHeader {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<VersionField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Versions are commonly written unquoted (`version: 1.0`), so accept numbers too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionField {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl VersionField {
    pub fn into_string(self) -> String {
        match self {
            VersionField::Text(s) => s,
            VersionField::Integer(i) => i.to_string(),
            VersionField::Float(f) => f.to_string(),
        }
    }
}

/// One entry of the `steps` list as written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: ConfigMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_from: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

// ---------------------------------------------------------------------------
// Validated definition
// ---------------------------------------------------------------------------

/// A validated workflow.
///
/// Invariants (established by the loader, relied on by the scheduler):
/// - step ids are unique,
/// - every `input_from` names a step that appears earlier in `steps`,
///   which makes the dependency graph acyclic by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Steps in definition order.
    pub steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Distinct agent names referenced by the workflow, in first-use order.
    pub fn agent_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !names.contains(&step.agent.as_str()) {
                names.push(step.agent.as_str());
            }
        }
        names
    }
}

/// A single step of a validated workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique within the workflow.
    pub id: String,
    /// Name the agent is registered under.
    pub agent: String,
    /// Static options passed to the agent. Never merged with bound input.
    #[serde(default)]
    pub config: ConfigMap,
    /// Single upstream step whose outputs become this step's bound input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_from: Option<String>,
    /// Output names the step promises to produce.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Per-attempt timeout override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Retry policy override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

// ---------------------------------------------------------------------------
// Retry configuration
// ---------------------------------------------------------------------------

/// Per-step retry overrides. Unset fields fall back to the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
}
