//! Run and step state.
//!
//! A `Run` is owned by the scheduler loop that created it. Everything else
//! only ever sees cloned snapshots of it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StepErrorKind;
use crate::workflow::{OutputMap, WorkflowDefinition};

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status of a single step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Step results
// ---------------------------------------------------------------------------

/// Error detail attached to a failed step or attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One invocation attempt of a step. Failed attempts carry their error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
}

/// Externally visible result of one step in a run.
///
/// Only finalized once the step reaches a terminal status; intermediate
/// attempt failures live in `attempt_log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub outputs: OutputMap,
    /// Set only when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempt_log: Vec<AttemptRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Why the step was skipped, when `status == Skipped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StepResult {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            outputs: OutputMap::new(),
            error: None,
            attempts: 0,
            attempt_log: Vec::new(),
            started_at: None,
            ended_at: None,
            skip_reason: None,
        }
    }

    /// Skipped without any invocation attempt.
    pub fn skipped(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            ended_at: Some(Utc::now()),
            skip_reason: Some(reason.into()),
            ..Self::pending(step_id)
        }
    }

    /// Failed before any attempt was made (e.g. unknown agent).
    pub fn failed_without_attempt(step_id: impl Into<String>, failure: StepFailure) -> Self {
        let now = Utc::now();
        Self {
            status: StepStatus::Failed,
            error: Some(failure),
            started_at: Some(now),
            ended_at: Some(now),
            ..Self::pending(step_id)
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// First failing step. `None` when the run was cancelled before any step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub kind: StepErrorKind,
    pub message: String,
}

impl RunFailure {
    pub fn cancelled() -> Self {
        Self {
            step_id: None,
            kind: StepErrorKind::Cancelled,
            message: "run cancelled".to_string(),
        }
    }

    /// Human-readable reason naming the failing step and its error kind.
    pub fn reason(&self) -> String {
        match &self.step_id {
            Some(step) => format!("step '{step}' failed ({}): {}", self.kind, self.message),
            None => format!("{}: {}", self.kind, self.message),
        }
    }
}

/// One execution of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub workflow_name: String,
    pub workflow_version: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// Unset until the run has drained and closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub initial_input: serde_json::Value,
    /// Step id -> result, one entry per step in the definition.
    pub steps: BTreeMap<String, StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl Run {
    /// A fresh pending run with one pending result per step.
    pub fn new(definition: &WorkflowDefinition, initial_input: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_name: definition.name.clone(),
            workflow_version: definition.version.clone(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            initial_input,
            steps: definition
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepResult::pending(s.id.clone())))
                .collect(),
            failure: None,
        }
    }

    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.get(id)
    }

    /// True once the run has a terminal status and has released its resources.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal() && self.finished_at.is_some()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}
