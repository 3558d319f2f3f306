//! Workflow definition parsing, validation, and discovery.
//!
//! Turns YAML into the validated `WorkflowDefinition`, collects every
//! structural problem into a `ValidationReport` (never stops at the first
//! one), and finds workflow files on disk.
//!
//! `input_from` may only name a step that appears earlier in the file, so a
//! single linear scan both resolves references and proves acyclicity.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use flowrun_types::error::{IssueCode, ValidationIssue, ValidationReport};
use flowrun_types::workflow::{StepDocument, StepSpec, WorkflowDefinition, WorkflowDocument};
use thiserror::Error;

use crate::agent::AgentRegistry;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// One or more structural problems.
    #[error("{0}")]
    Validation(ValidationReport),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkflowError {
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            WorkflowError::Validation(report) => Some(report),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse YAML into the raw document form without validating it.
pub fn parse_workflow_document(yaml: &str) -> Result<WorkflowDocument, WorkflowError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))
}

/// Parse and validate a workflow.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let doc = parse_workflow_document(yaml)?;
    validate_document(&doc, None).map_err(WorkflowError::Validation)
}

/// Parse and validate a workflow, also checking each step's config against
/// the `required_config` keys its agent declares.
///
/// Agents missing from the registry are not an error here; they are resolved
/// when the step is dispatched.
pub fn parse_workflow_yaml_with_registry(
    yaml: &str,
    registry: &AgentRegistry,
) -> Result<WorkflowDefinition, WorkflowError> {
    let doc = parse_workflow_document(yaml)?;
    validate_document(&doc, Some(registry)).map_err(WorkflowError::Validation)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn is_valid_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Validate a document and build the definition.
///
/// Checks, reporting every violation:
/// - `workflow.name` present and made of alphanumerics, `-` or `_`
/// - `workflow.version` present
/// - at least one step
/// - every step has an `id` and an `agent`; ids are unique
/// - `input_from` names an earlier step (not itself, not a later one)
/// - `timeout_secs` > 0 and retry overrides are sane
/// - agent `required_config` keys are present (when a registry is given)
pub fn validate_document(
    doc: &WorkflowDocument,
    registry: Option<&AgentRegistry>,
) -> Result<WorkflowDefinition, ValidationReport> {
    let header = doc.workflow.clone().unwrap_or_default();
    let name = non_empty(&header.name).map(str::to_string);
    let mut report = ValidationReport::new(name.clone());

    if doc.workflow.is_none() {
        report.push(ValidationIssue::new(
            IssueCode::MissingField,
            None,
            "missing top-level 'workflow' block",
        ));
    }
    match &name {
        None if doc.workflow.is_some() => report.push(ValidationIssue::new(
            IssueCode::MissingField,
            None,
            "workflow.name is required",
        )),
        Some(n) if !is_valid_name(n) => report.push(ValidationIssue::new(
            IssueCode::InvalidName,
            None,
            format!(
                "workflow name '{n}' contains invalid characters (only alphanumerics, '-' and '_' allowed)"
            ),
        )),
        _ => {}
    }
    if doc.workflow.is_some() && header.version.is_none() {
        report.push(ValidationIssue::new(
            IssueCode::MissingField,
            None,
            "workflow.version is required",
        ));
    }
    if doc.steps.is_empty() {
        report.push(ValidationIssue::new(
            IssueCode::EmptyWorkflow,
            None,
            "workflow must have at least one step",
        ));
    }

    let all_ids: HashSet<&str> = doc.steps.iter().filter_map(|s| non_empty(&s.id)).collect();
    let mut earlier: HashSet<&str> = HashSet::new();

    for (index, step) in doc.steps.iter().enumerate() {
        let id = non_empty(&step.id);
        if id.is_none() {
            report.push(ValidationIssue::new(
                IssueCode::MissingField,
                None,
                format!("step #{} has no id", index + 1),
            ));
        }
        let agent = non_empty(&step.agent);
        if agent.is_none() {
            report.push(ValidationIssue::new(
                IssueCode::MissingField,
                id,
                "step has no agent",
            ));
        }

        if let Some(source) = step.input_from.as_deref() {
            if Some(source) == id {
                report.push(ValidationIssue::new(
                    IssueCode::SelfReference,
                    id,
                    "input_from references the step itself",
                ));
            } else if !earlier.contains(source) {
                let (code, message) = if all_ids.contains(source) {
                    (
                        IssueCode::ForwardReference,
                        format!("input_from '{source}' must name a step defined earlier"),
                    )
                } else {
                    (
                        IssueCode::UnknownStepReference,
                        format!("input_from references unknown step '{source}'"),
                    )
                };
                report.push(ValidationIssue::new(code, id, message));
            }
        }

        if let Some(id) = id {
            if !earlier.insert(id) {
                report.push(ValidationIssue::new(
                    IssueCode::DuplicateStepId,
                    Some(id),
                    format!("duplicate step id '{id}'"),
                ));
            }
        }

        check_overrides(step, id, &mut report);

        if let (Some(registry), Some(agent)) = (registry, agent) {
            if let Some(meta) = registry.metadata(agent) {
                for key in meta.required_config {
                    if !step.config.contains_key(&key) {
                        report.push(ValidationIssue::new(
                            IssueCode::MissingRequiredConfig,
                            id,
                            format!("agent '{agent}' requires config key '{key}'"),
                        ));
                    }
                }
            }
        }
    }

    if !report.is_empty() {
        return Err(report);
    }

    // Every Option checked above; build the definition.
    let steps = doc
        .steps
        .iter()
        .filter_map(|step| {
            Some(StepSpec {
                id: non_empty(&step.id)?.to_string(),
                agent: non_empty(&step.agent)?.to_string(),
                config: step.config.clone(),
                input_from: step.input_from.clone(),
                outputs: step.outputs.clone(),
                timeout_secs: step.timeout_secs,
                retry: step.retry.clone(),
            })
        })
        .collect();

    Ok(WorkflowDefinition {
        name: name.unwrap_or_default(),
        version: header
            .version
            .map(|v| v.into_string())
            .unwrap_or_default(),
        description: header.description,
        steps,
    })
}

fn check_overrides(step: &StepDocument, id: Option<&str>, report: &mut ValidationReport) {
    if step.timeout_secs == Some(0) {
        report.push(ValidationIssue::new(
            IssueCode::InvalidTimeout,
            id,
            "timeout_secs must be greater than 0",
        ));
    }
    let Some(retry) = &step.retry else {
        return;
    };
    if retry.max_attempts == Some(0) {
        report.push(ValidationIssue::new(
            IssueCode::InvalidRetry,
            id,
            "retry.max_attempts must be at least 1",
        ));
    }
    if let Some(m) = retry.multiplier {
        if !m.is_finite() || m < 1.0 {
            report.push(ValidationIssue::new(
                IssueCode::InvalidRetry,
                id,
                format!("retry.multiplier must be a finite number >= 1.0 (got {m})"),
            ));
        }
    }
    if let (Some(initial), Some(max)) = (retry.initial_backoff_ms, retry.max_backoff_ms) {
        if initial > max {
            report.push(ValidationIssue::new(
                IssueCode::InvalidRetry,
                id,
                format!("retry.initial_backoff_ms ({initial}) exceeds retry.max_backoff_ms ({max})"),
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// All `.yaml` / `.yml` files under `base_dir`, recursively, sorted.
///
/// A missing directory yields an empty list.
pub fn discover_workflow_files(base_dir: &Path) -> Result<Vec<PathBuf>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort();
    Ok(results)
}

fn discover_recursive(dir: &Path, results: &mut Vec<PathBuf>) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            results.push(path);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
