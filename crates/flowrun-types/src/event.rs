//! Run lifecycle events.
//!
//! Every event carries the run id, a per-run sequence number starting at 1,
//! and the emission timestamp. Events are immutable once published.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StepErrorKind;
use crate::workflow::OutputMap;

/// An event published on a run's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    /// Strictly increasing within a run.
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RunEventKind,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    /// The run was created and is now running.
    RunCreated {
        workflow_name: String,
        workflow_version: String,
    },

    /// An agent invocation for the step has begun (first attempt).
    StepStarted { step_id: String, agent: String },

    /// An attempt failed and another one is scheduled after `delay_ms`.
    StepRetrying {
        step_id: String,
        attempt: u32,
        error: String,
        delay_ms: u64,
    },

    /// The step finished successfully.
    StepCompleted {
        step_id: String,
        attempts: u32,
        outputs: OutputMap,
    },

    /// The step failed terminally.
    StepFailed {
        step_id: String,
        attempts: u32,
        kind: StepErrorKind,
        error: String,
    },

    /// The step was skipped without any invocation attempt.
    StepSkipped { step_id: String, reason: String },

    /// Every step completed.
    RunCompleted { duration_ms: u64 },

    /// The run failed or was cancelled.
    RunFailed {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_step: Option<String>,
        kind: StepErrorKind,
    },
}

impl RunEventKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            RunEventKind::RunCreated { .. } => "run_created",
            RunEventKind::StepStarted { .. } => "step_started",
            RunEventKind::StepRetrying { .. } => "step_retrying",
            RunEventKind::StepCompleted { .. } => "step_completed",
            RunEventKind::StepFailed { .. } => "step_failed",
            RunEventKind::StepSkipped { .. } => "step_skipped",
            RunEventKind::RunCompleted { .. } => "run_completed",
            RunEventKind::RunFailed { .. } => "run_failed",
        }
    }

    /// Step the event concerns, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            RunEventKind::StepStarted { step_id, .. }
            | RunEventKind::StepRetrying { step_id, .. }
            | RunEventKind::StepCompleted { step_id, .. }
            | RunEventKind::StepFailed { step_id, .. }
            | RunEventKind::StepSkipped { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    /// The last event a run ever publishes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEventKind::RunCompleted { .. } | RunEventKind::RunFailed { .. }
        )
    }
}
