//! `flowrun validate` -- report every problem in a workflow file.

use std::path::Path;

use anyhow::{Context, Result, bail};
use console::style;
use flowrun_core::workflow::WorkflowError;
use flowrun_core::workflow::definition::parse_workflow_yaml_with_registry;
use flowrun_core::workflow::graph::StepGraph;
use flowrun_types::error::ValidationReport;

use crate::state::AppState;

/// Validate `file` against the configured agents.
///
/// Fails (non-zero exit) when the document does not parse or has issues.
pub async fn validate_file(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let yaml = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let report = match parse_workflow_yaml_with_registry(&yaml, state.engine.registry()) {
        Ok(def) => {
            let graph = StepGraph::build(&def);
            let waves = graph.execution_waves();
            if json {
                let out = serde_json::json!({
                    "valid": true,
                    "name": def.name,
                    "version": def.version,
                    "steps": def.steps.len(),
                    "waves": waves,
                    "issues": [],
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!();
                println!(
                    "  {} Workflow '{}' v{} is valid ({} steps)",
                    style("✓").green().bold(),
                    style(&def.name).cyan(),
                    def.version,
                    def.steps.len()
                );
                println!();
                for (i, wave) in waves.iter().enumerate() {
                    println!(
                        "  {} {}",
                        style(format!("wave {}:", i + 1)).dim(),
                        wave.join(", ")
                    );
                }
                let unknown: Vec<&str> = def
                    .agent_names()
                    .into_iter()
                    .filter(|agent| !state.engine.registry().contains(agent))
                    .collect();
                if !unknown.is_empty() {
                    println!(
                        "  {} Agents not registered yet: {}",
                        style("!").yellow().bold(),
                        unknown.join(", ")
                    );
                }
                println!();
            }
            return Ok(());
        }
        Err(WorkflowError::Validation(report)) => report,
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to parse {}", file.display()));
        }
    };

    if json {
        let out = serde_json::json!({
            "valid": false,
            "name": report.workflow,
            "issues": report.issues,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_report(&report);
    }
    bail!("{} has {} issue(s)", file.display(), report.len())
}

/// Print a validation report, one issue per line.
pub fn print_report(report: &ValidationReport) {
    println!();
    println!(
        "  {} Workflow '{}' is invalid",
        style("✗").red().bold(),
        style(report.workflow.as_deref().unwrap_or("<unnamed>")).cyan()
    );
    println!();
    for issue in &report.issues {
        let location = issue
            .step_id
            .as_deref()
            .map(|id| format!("step '{id}'"))
            .unwrap_or_else(|| "workflow".to_string());
        println!(
            "  {} {:<24} {}: {}",
            style("-").dim(),
            style(issue.code.as_str()).yellow(),
            location,
            issue.message
        );
    }
    println!();
}
