//! Error taxonomy shared across crates.
//!
//! `StepErrorKind` classifies why a step attempt (or a step) failed and
//! decides whether the retry policy may try again. `ValidationReport`
//! collects every structural problem found while loading a workflow.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Step error kinds
// ---------------------------------------------------------------------------

/// Why a step (or a single attempt of it) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// Malformed or unresolvable workflow. Rejected before scheduling.
    Definition,
    /// The step's agent was not registered at dispatch time.
    UnknownAgent,
    /// The agent itself reported a failure.
    AgentInvocation,
    /// An attempt exceeded its deadline.
    Timeout,
    /// The run (or step) was cancelled.
    Cancelled,
}

impl StepErrorKind {
    /// Only agent failures and timeouts are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, StepErrorKind::AgentInvocation | StepErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepErrorKind::Definition => "definition",
            StepErrorKind::UnknownAgent => "unknown_agent",
            StepErrorKind::AgentInvocation => "agent_invocation",
            StepErrorKind::Timeout => "timeout",
            StepErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Machine-readable code for a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    DuplicateStepId,
    UnknownStepReference,
    ForwardReference,
    SelfReference,
    MissingField,
    MissingRequiredConfig,
    InvalidName,
    EmptyWorkflow,
    InvalidRetry,
    InvalidTimeout,
}

impl IssueCode {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueCode::DuplicateStepId => "duplicate_step_id",
            IssueCode::UnknownStepReference => "unknown_step_reference",
            IssueCode::ForwardReference => "forward_reference",
            IssueCode::SelfReference => "self_reference",
            IssueCode::MissingField => "missing_field",
            IssueCode::MissingRequiredConfig => "missing_required_config",
            IssueCode::InvalidName => "invalid_name",
            IssueCode::EmptyWorkflow => "empty_workflow",
            IssueCode::InvalidRetry => "invalid_retry",
            IssueCode::InvalidTimeout => "invalid_timeout",
        }
    }
}

/// A single structural problem in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    /// Step the issue is attached to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(code: IssueCode, step_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code,
            step_id: step_id.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(step) => write!(f, "[{}] step '{}': {}", self.code.as_str(), step, self.message),
            None => write!(f, "[{}] {}", self.code.as_str(), self.message),
        }
    }
}

/// Every issue found while validating one workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Workflow name, when one could be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new(workflow: Option<String>) -> Self {
        Self {
            workflow,
            issues: Vec::new(),
        }
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn has(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.workflow.as_deref().unwrap_or("<unnamed>");
        write!(f, "workflow '{name}' has {} issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}
