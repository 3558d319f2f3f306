//! DAG scheduler: one scheduling loop per run.
//!
//! The loop exclusively owns the `Run`. It dispatches every ready step
//! (dependency completed, or no dependency) into a `JoinSet` without waiting
//! on its siblings, and recomputes the frontier each time a step result comes
//! back. Because only the loop dispatches, and it records each step id as it
//! goes, a step is dispatched at most once per run.
//!
//! # Failure and cancellation
//!
//! - A failed step marks the run Failed immediately and skips all of its
//!   transitive dependents. No new steps are dispatched afterwards, but the
//!   loop keeps draining in-flight steps before it closes the run.
//! - Cancellation stops dispatching, reaches in-flight invocations through
//!   the shared token, and marks the run Failed(cancelled) once drained.
//! - Steps never dispatched are Skipped at close. The finished snapshot is
//!   sent first, then the terminal `RunCompleted` / `RunFailed` event, which
//!   is always the run's last event.
//!
//! Readers never touch the `Run`; they get snapshots over a `watch` channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowrun_types::config::EngineConfig;
use flowrun_types::error::StepErrorKind;
use flowrun_types::event::RunEventKind;
use flowrun_types::run::{Run, RunFailure, RunStatus, StepFailure, StepResult, StepStatus};
use flowrun_types::workflow::{StepSpec, WorkflowDefinition};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

use crate::agent::AgentRegistry;
use crate::event::EventBroadcaster;

use super::graph::StepGraph;
use super::retry::RetryPolicy;
use super::step_executor::{StepContext, StepExecutor};

// ---------------------------------------------------------------------------
// RunScheduler trait
// ---------------------------------------------------------------------------

/// Everything a scheduler needs to drive one run.
#[derive(Debug)]
pub struct RunContext {
    /// Already `Running`, with `RunCreated` published.
    pub run: Run,
    pub definition: Arc<WorkflowDefinition>,
    pub registry: Arc<AgentRegistry>,
    pub cancel: CancellationToken,
    /// Receives a snapshot after every state change.
    pub snapshots: watch::Sender<Run>,
}

/// Contract for run scheduling strategies.
///
/// An alternate strategy is a second implementation of this trait, chosen by
/// the caller when building the engine.
pub trait RunScheduler: Send + Sync + 'static {
    /// Drive the run to a terminal status and return the final snapshot.
    fn drive(&self, ctx: RunContext) -> impl std::future::Future<Output = Run> + Send;
}

// ---------------------------------------------------------------------------
// DagRunner
// ---------------------------------------------------------------------------

/// Frontier-based concurrent DAG scheduler.
#[derive(Debug, Clone)]
pub struct DagRunner {
    events: EventBroadcaster,
    executor: StepExecutor,
    config: Arc<EngineConfig>,
}

impl DagRunner {
    pub fn new(events: EventBroadcaster, config: Arc<EngineConfig>) -> Self {
        let executor = StepExecutor::new(events.clone())
            .with_cancel_grace(Duration::from_millis(config.cancel_grace_ms));
        Self {
            executor,
            events,
            config,
        }
    }
}

impl RunScheduler for DagRunner {
    async fn drive(&self, ctx: RunContext) -> Run {
        let span = info_span!(
            "run",
            run_id = %ctx.run.id,
            workflow = %ctx.run.workflow_name,
        );
        self.drive_run(ctx).instrument(span).await
    }
}

impl DagRunner {
    async fn drive_run(&self, ctx: RunContext) -> Run {
        let RunContext {
            run,
            definition,
            registry,
            cancel,
            snapshots,
        } = ctx;

        tracing::info!(
            run_id = %run.id,
            workflow = %run.workflow_name,
            steps = definition.steps.len(),
            "run started"
        );

        let max_parallel = self.config.max_parallel_steps.unwrap_or(usize::MAX).max(1);
        let mut state = RunLoop {
            runner: self,
            step_ctx: StepContext {
                run_id: run.id,
                run_input: Arc::new(run.initial_input.clone()),
                cancel: cancel.clone(),
            },
            graph: StepGraph::build(&definition),
            run,
            definition,
            registry,
            snapshots,
            dispatched: HashSet::new(),
            in_flight: JoinSet::new(),
            max_parallel,
            cancel_requested: false,
        };

        loop {
            if !state.cancel_requested && !cancel.is_cancelled() {
                state.dispatch_ready();
            }
            if state.in_flight.is_empty() {
                break;
            }

            tokio::select! {
                joined = state.in_flight.join_next() => match joined {
                    Some(Ok(result)) => state.record(result),
                    Some(Err(e)) => {
                        tracing::error!(run_id = %state.run.id, error = %e, "step task aborted");
                    }
                    None => break,
                },
                _ = cancel.cancelled(), if !state.cancel_requested => {
                    state.cancel_requested = true;
                    tracing::info!(
                        run_id = %state.run.id,
                        in_flight = state.in_flight.len(),
                        "run cancellation requested; draining in-flight steps"
                    );
                }
            }
        }

        // A cancellation that raced the last dispatch decision still counts.
        if cancel.is_cancelled() && state.run.status == RunStatus::Running {
            state.cancel_requested = true;
        }
        state.close()
    }
}

// ---------------------------------------------------------------------------
// Loop state
// ---------------------------------------------------------------------------

struct RunLoop<'a> {
    runner: &'a DagRunner,
    run: Run,
    definition: Arc<WorkflowDefinition>,
    graph: StepGraph,
    registry: Arc<AgentRegistry>,
    step_ctx: StepContext,
    snapshots: watch::Sender<Run>,
    dispatched: HashSet<String>,
    in_flight: JoinSet<StepResult>,
    max_parallel: usize,
    cancel_requested: bool,
}

impl RunLoop<'_> {
    fn publish(&self, kind: RunEventKind) {
        self.runner.events.publish(self.run.id, kind);
    }

    fn snapshot(&self) {
        self.snapshots.send_replace(self.run.clone());
    }

    fn is_ready(&self, step: &StepSpec) -> bool {
        if self.dispatched.contains(&step.id) {
            return false;
        }
        if self.run.step(&step.id).map(|r| r.status) != Some(StepStatus::Pending) {
            return false;
        }
        match &step.input_from {
            None => true,
            Some(source) => {
                self.run.step(source).map(|r| r.status) == Some(StepStatus::Completed)
            }
        }
    }

    /// Dispatch every ready step, in definition order, up to the parallelism cap.
    fn dispatch_ready(&mut self) {
        let definition = Arc::clone(&self.definition);
        let mut changed = false;

        for step in &definition.steps {
            if self.run.status != RunStatus::Running || self.in_flight.len() >= self.max_parallel {
                break;
            }
            if !self.is_ready(step) {
                continue;
            }
            self.dispatched.insert(step.id.clone());
            changed = true;

            // Resolved once, here. Later registry changes do not affect this step.
            let agent = match self.registry.resolve(&step.agent) {
                Ok(agent) => agent,
                Err(e) => {
                    let failure = StepFailure::new(StepErrorKind::UnknownAgent, e.to_string());
                    tracing::warn!(
                        run_id = %self.run.id,
                        step_id = %step.id,
                        agent = %step.agent,
                        "step agent not registered"
                    );
                    self.publish(RunEventKind::StepFailed {
                        step_id: step.id.clone(),
                        attempts: 0,
                        kind: failure.kind,
                        error: failure.message.clone(),
                    });
                    self.record(StepResult::failed_without_attempt(step.id.clone(), failure));
                    continue;
                }
            };

            let bound_input = step
                .input_from
                .as_ref()
                .and_then(|source| self.run.step(source))
                .map(|upstream| upstream.outputs.clone());

            if let Some(result) = self.run.steps.get_mut(&step.id) {
                result.status = StepStatus::Running;
                result.started_at = Some(Utc::now());
            }
            tracing::debug!(run_id = %self.run.id, step_id = %step.id, agent = %step.agent, "dispatching step");

            let executor = self.runner.executor.clone();
            let policy = RetryPolicy::resolve(Some(step), &self.runner.config);
            let ctx = self.step_ctx.clone();
            let step = step.clone();
            self.in_flight.spawn(
                async move { executor.execute(&ctx, &step, bound_input, agent, &policy).await }
                    .in_current_span(),
            );
        }

        if changed {
            self.snapshot();
        }
    }

    /// Record a terminal step result and apply its consequences.
    fn record(&mut self, result: StepResult) {
        // A step can report back before the loop has observed the token.
        if self.step_ctx.cancel.is_cancelled() && self.run.status == RunStatus::Running {
            self.cancel_requested = true;
        }
        let step_id = result.step_id.clone();
        let failure = (result.status == StepStatus::Failed)
            .then(|| result.error.clone())
            .flatten();
        self.run.steps.insert(step_id.clone(), result);

        if let Some(failure) = failure {
            if self.run.failure.is_none() && !self.cancel_requested {
                self.run.status = RunStatus::Failed;
                self.run.failure = Some(RunFailure {
                    step_id: Some(step_id.clone()),
                    kind: failure.kind,
                    message: failure.message,
                });
                tracing::info!(
                    run_id = %self.run.id,
                    step_id = %step_id,
                    in_flight = self.in_flight.len(),
                    "run failed; draining in-flight steps"
                );
            }
            self.skip_dependents(&step_id);
        }
        self.snapshot();
    }

    fn skip_dependents(&mut self, failed_step: &str) {
        let dependents: Vec<String> = self
            .graph
            .transitive_dependents(failed_step)
            .into_iter()
            .map(str::to_string)
            .collect();
        for step_id in dependents {
            self.skip(&step_id, format!("upstream step '{failed_step}' did not complete"));
        }
    }

    fn skip(&mut self, step_id: &str, reason: String) {
        let pending = self
            .run
            .step(step_id)
            .is_some_and(|r| r.status == StepStatus::Pending);
        if !pending {
            return;
        }
        self.publish(RunEventKind::StepSkipped {
            step_id: step_id.to_string(),
            reason: reason.clone(),
        });
        self.run
            .steps
            .insert(step_id.to_string(), StepResult::skipped(step_id, reason));
    }

    /// Finalize the run once nothing is in flight.
    fn close(mut self) -> Run {
        let leftover_reason = if self.cancel_requested {
            "run cancelled before the step was dispatched"
        } else {
            "run failed before the step was dispatched"
        };
        let definition = Arc::clone(&self.definition);
        for step in &definition.steps {
            self.skip(&step.id, leftover_reason.to_string());
            // Only reachable if a step task was aborted.
            if let Some(result) = self.run.steps.get_mut(&step.id) {
                if result.status == StepStatus::Running {
                    result.status = StepStatus::Failed;
                    result.error = Some(StepFailure::new(
                        StepErrorKind::AgentInvocation,
                        "step task aborted",
                    ));
                    result.ended_at = Some(Utc::now());
                }
            }
        }

        let all_completed = self
            .run
            .steps
            .values()
            .all(|r| r.status == StepStatus::Completed);

        if self.cancel_requested {
            self.run.status = RunStatus::Failed;
            self.run.failure.get_or_insert_with(RunFailure::cancelled);
        } else if all_completed {
            self.run.status = RunStatus::Completed;
        } else {
            self.run.status = RunStatus::Failed;
            if self.run.failure.is_none() {
                let first_failed = definition.steps.iter().find_map(|s| {
                    self.run
                        .step(&s.id)
                        .filter(|r| r.status == StepStatus::Failed)
                        .and_then(|r| r.error.clone().map(|e| (s.id.clone(), e)))
                });
                self.run.failure = Some(match first_failed {
                    Some((step_id, e)) => RunFailure {
                        step_id: Some(step_id),
                        kind: e.kind,
                        message: e.message,
                    },
                    None => RunFailure {
                        step_id: None,
                        kind: StepErrorKind::AgentInvocation,
                        message: "run ended with incomplete steps".to_string(),
                    },
                });
            }
        }

        let finished_at = Utc::now();
        self.run.finished_at = Some(finished_at);
        let duration_ms = self.run.duration_ms().unwrap_or(0);
        // Finished snapshot first: once a stream sees the terminal event,
        // status queries already report the finished run.
        self.snapshot();

        match (&self.run.status, &self.run.failure) {
            (RunStatus::Failed, Some(failure)) => {
                tracing::info!(
                    run_id = %self.run.id,
                    duration_ms,
                    reason = %failure.reason(),
                    "run failed"
                );
                self.publish(RunEventKind::RunFailed {
                    reason: failure.reason(),
                    failed_step: failure.step_id.clone(),
                    kind: failure.kind,
                });
            }
            _ => {
                tracing::info!(run_id = %self.run.id, duration_ms, "run completed");
                self.publish(RunEventKind::RunCompleted { duration_ms });
            }
        }
        self.run
    }
}
