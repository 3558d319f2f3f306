//! `flowrun run` -- execute a workflow and stream its events to the terminal.
//!
//! Ctrl+C cancels the run; the command keeps streaming until the run's
//! terminal event so in-flight steps are seen to settle.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use futures_util::StreamExt;

use flowrun_core::agent::{BoxAgent, EchoAgent, RegisterMode};
use flowrun_core::workflow::{CatalogEntry, WorkflowError};
use flowrun_types::agent::AgentMetadata;
use flowrun_types::event::{RunEvent, RunEventKind};
use flowrun_types::run::{Run, RunStatus, StepResult, StepStatus};
use flowrun_types::workflow::WorkflowDefinition;

use crate::cli::validate::print_report;
use crate::state::AppState;

/// Run `target` (a workflow file or a registered workflow name).
pub async fn run_workflow(
    state: &AppState,
    target: &str,
    input: Option<&str>,
    echo: bool,
    json: bool,
) -> Result<()> {
    let engine = &state.engine;
    let name = resolve_target(state, target).await?;

    let definition = match engine.catalog().get(&name) {
        Some(CatalogEntry::Valid(definition)) => definition,
        Some(CatalogEntry::Invalid(report)) => {
            print_report(&report);
            bail!("Workflow '{name}' is invalid");
        }
        None => bail!("Workflow '{name}' not found"),
    };

    if echo {
        for agent in definition.agent_names() {
            let metadata = AgentMetadata {
                description: Some("echo stand-in (dry run)".to_string()),
                ..AgentMetadata::default()
            };
            engine
                .registry()
                .register_with(agent, BoxAgent::new(EchoAgent), metadata, RegisterMode::Replace)?;
        }
    }

    let initial_input = match input {
        Some(raw) => serde_json::from_str(raw).context("Invalid JSON in --input")?,
        None => serde_json::json!({}),
    };

    let run_id = engine.create_run(&name, initial_input)?;
    let mut events = engine.subscribe(run_id, Some(1))?;

    if !json {
        println!();
        println!(
            "  {} Running '{}' v{}",
            style("▶").cyan().bold(),
            style(&definition.name).cyan(),
            definition.version
        );
        println!("  Run ID: {}", style(run_id).dim());
        println!();
    }

    let mut cancelling = false;
    loop {
        tokio::select! {
            next = events.next() => match next {
                Some(Ok(event)) => print_event(&event, json)?,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "event stream ended early");
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                engine.cancel_run(run_id)?;
                if !json {
                    println!("  {}", style("Cancelling run, waiting for steps to settle...").yellow());
                }
            }
        }
    }

    let run = engine.wait_for_run(run_id).await?;
    if !json {
        print_summary(&run, &definition);
    }

    match run.status {
        RunStatus::Completed => Ok(()),
        _ => {
            let reason = run
                .failure
                .as_ref()
                .map(|f| f.reason())
                .unwrap_or_else(|| format!("run ended as {}", run.status));
            bail!("Run {run_id} failed: {reason}")
        }
    }
}

/// Register `target` if it is a file, and return the workflow name to run.
async fn resolve_target(state: &AppState, target: &str) -> Result<String> {
    let path = Path::new(target);
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(target.to_string());
    }

    let yaml = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    match state.engine.register_workflow_yaml(&yaml) {
        Ok(definition) => Ok(definition.name.clone()),
        Err(WorkflowError::Validation(report)) => {
            print_report(&report);
            bail!("{} has {} issue(s)", path.display(), report.len())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load {}", path.display())),
    }
}

fn print_event(event: &RunEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let marker = match &event.kind {
        RunEventKind::RunCreated { .. } | RunEventKind::StepStarted { .. } => style("•").cyan(),
        RunEventKind::StepRetrying { .. } | RunEventKind::StepSkipped { .. } => {
            style("~").yellow()
        }
        RunEventKind::StepCompleted { .. } | RunEventKind::RunCompleted { .. } => {
            style("✓").green()
        }
        RunEventKind::StepFailed { .. } | RunEventKind::RunFailed { .. } => style("✗").red(),
    };
    println!(
        "  {} {} {}",
        style(format!("#{:<3}", event.sequence)).dim(),
        marker,
        describe_event(&event.kind)
    );
    Ok(())
}

/// One-line human description of an event.
pub fn describe_event(kind: &RunEventKind) -> String {
    match kind {
        RunEventKind::RunCreated {
            workflow_name,
            workflow_version,
        } => format!("run created for {workflow_name} v{workflow_version}"),
        RunEventKind::StepStarted { step_id, agent } => {
            format!("{step_id} started on agent '{agent}'")
        }
        RunEventKind::StepRetrying {
            step_id,
            attempt,
            error,
            delay_ms,
        } => format!("{step_id} attempt {attempt} failed ({error}), retrying in {delay_ms}ms"),
        RunEventKind::StepCompleted {
            step_id, attempts, ..
        } => format!("{step_id} completed after {attempts} attempt(s)"),
        RunEventKind::StepFailed {
            step_id,
            attempts,
            kind,
            error,
        } => format!("{step_id} failed after {attempts} attempt(s): {kind}: {error}"),
        RunEventKind::StepSkipped { step_id, reason } => format!("{step_id} skipped: {reason}"),
        RunEventKind::RunCompleted { duration_ms } => format!("run completed in {duration_ms}ms"),
        RunEventKind::RunFailed { reason, .. } => format!("run failed: {reason}"),
    }
}

/// Step results in definition order.
fn ordered_results<'a>(
    run: &'a Run,
    definition: &'a WorkflowDefinition,
) -> Vec<(&'a str, &'a StepResult)> {
    definition
        .steps
        .iter()
        .filter_map(|step| run.step(&step.id).map(|result| (step.id.as_str(), result)))
        .collect()
}

fn print_summary(run: &Run, definition: &WorkflowDefinition) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Detail"),
        ]);

    for (id, result) in ordered_results(run, definition) {
        let color = match result.status {
            StepStatus::Completed => Color::Green,
            StepStatus::Failed => Color::Red,
            StepStatus::Skipped => Color::Yellow,
            StepStatus::Pending | StepStatus::Running => Color::Grey,
        };
        let detail = match result.status {
            StepStatus::Completed => serde_json::Value::Object(result.outputs.clone()).to_string(),
            StepStatus::Failed => result
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            StepStatus::Skipped => result.skip_reason.clone().unwrap_or_default(),
            _ => String::new(),
        };
        table.add_row(vec![
            Cell::new(id),
            Cell::new(result.status).fg(color),
            Cell::new(result.attempts),
            Cell::new(detail),
        ]);
    }

    println!();
    println!("{table}");
    println!(
        "  Status: {}  Duration: {}ms",
        match run.status {
            RunStatus::Completed => style(run.status.to_string()).green().bold(),
            _ => style(run.status.to_string()).red().bold(),
        },
        run.duration_ms().unwrap_or(0)
    );
    println!();
}
