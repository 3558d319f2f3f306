//! Run control surface.
//!
//! `WorkflowEngine` ties the pieces together: it looks workflows up in the
//! catalog, opens a run (publishing `RunCreated`), hands it to the scheduler
//! on its own task, and answers status, cancel, subscribe, and wait queries
//! from `watch` snapshots. It never mutates a run after handing it off.
//!
//! Finished runs are retained for status queries and replay up to
//! `max_retained_runs`; past that the oldest finished runs are forgotten,
//! together with their event history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flowrun_types::config::EngineConfig;
use flowrun_types::error::ValidationReport;
use flowrun_types::event::RunEventKind;
use flowrun_types::run::{Run, RunStatus};
use flowrun_types::workflow::WorkflowDefinition;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::AgentRegistry;
use crate::event::{EventBroadcaster, EventStream};

use super::catalog::{CatalogEntry, WorkflowCatalog};
use super::definition::WorkflowError;
use super::runner::{DagRunner, RunContext, RunScheduler};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    /// The workflow was invalid when it was registered.
    #[error("{0}")]
    InvalidWorkflow(ValidationReport),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("run {0} has not finished")]
    RunActive(Uuid),
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

struct RunHandle {
    snapshot: watch::Receiver<Run>,
    cancel: CancellationToken,
}

type RunTable = DashMap<Uuid, RunHandle>;

/// Forget the oldest finished runs until at most `keep` remain.
fn prune_finished(runs: &RunTable, events: &EventBroadcaster, keep: usize) {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = runs
        .iter()
        .filter_map(|entry| {
            let run = entry.snapshot.borrow();
            run.finished_at
                .filter(|_| run.is_finished())
                .map(|at| (at, *entry.key()))
        })
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, run_id) in finished.into_iter().take(excess) {
        runs.remove(&run_id);
        events.forget(run_id);
    }
    tracing::debug!(forgotten = excess, retained = keep, "pruned finished runs");
}

/// Creates and tracks runs. Generic over the scheduling strategy.
pub struct WorkflowEngine<S: RunScheduler = DagRunner> {
    registry: Arc<AgentRegistry>,
    catalog: Arc<WorkflowCatalog>,
    events: EventBroadcaster,
    scheduler: Arc<S>,
    config: Arc<EngineConfig>,
    runs: Arc<RunTable>,
}

impl WorkflowEngine<DagRunner> {
    /// Engine with the default DAG scheduler.
    pub fn new(config: EngineConfig, registry: Arc<AgentRegistry>) -> Self {
        let config = Arc::new(config);
        let events = EventBroadcaster::new(config.event_buffer_capacity);
        let scheduler = DagRunner::new(events.clone(), Arc::clone(&config));
        Self::with_scheduler(config, registry, events, scheduler)
    }
}

impl<S: RunScheduler> WorkflowEngine<S> {
    /// Engine with a caller-chosen scheduler. `scheduler` should publish to `events`.
    pub fn with_scheduler(
        config: Arc<EngineConfig>,
        registry: Arc<AgentRegistry>,
        events: EventBroadcaster,
        scheduler: S,
    ) -> Self {
        Self {
            registry,
            catalog: Arc::new(WorkflowCatalog::new()),
            events,
            scheduler: Arc::new(scheduler),
            config,
            runs: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<WorkflowCatalog> {
        &self.catalog
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a YAML workflow, validating agent config against the registry.
    pub fn register_workflow_yaml(
        &self,
        yaml: &str,
    ) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.catalog.register_yaml(yaml, Some(&self.registry))
    }

    /// Start a run of `workflow_name`. Must be called within a Tokio runtime.
    ///
    /// The run is `Running` and its `RunCreated` event is published before
    /// this returns, so `subscribe(run_id, Some(1))` always sees it.
    pub fn create_run(
        &self,
        workflow_name: &str,
        initial_input: serde_json::Value,
    ) -> Result<Uuid, EngineError> {
        let definition = match self.catalog.get(workflow_name) {
            Some(CatalogEntry::Valid(definition)) => definition,
            Some(CatalogEntry::Invalid(report)) => return Err(EngineError::InvalidWorkflow(report)),
            None => return Err(EngineError::UnknownWorkflow(workflow_name.to_string())),
        };

        let mut run = Run::new(&definition, initial_input);
        let run_id = run.id;
        run.status = RunStatus::Running;

        self.events.open(run_id);
        self.events.publish(
            run_id,
            RunEventKind::RunCreated {
                workflow_name: definition.name.clone(),
                workflow_version: definition.version.clone(),
            },
        );

        let (snapshots, receiver) = watch::channel(run.clone());
        let cancel = CancellationToken::new();
        self.runs.insert(
            run_id,
            RunHandle {
                snapshot: receiver,
                cancel: cancel.clone(),
            },
        );

        let ctx = RunContext {
            run,
            definition,
            registry: Arc::clone(&self.registry),
            cancel,
            snapshots,
        };
        let scheduler = Arc::clone(&self.scheduler);
        let runs = Arc::clone(&self.runs);
        let events = self.events.clone();
        let keep = self.config.max_retained_runs.max(1);
        tokio::spawn(async move {
            scheduler.drive(ctx).await;
            prune_finished(&runs, &events, keep);
        });

        tracing::debug!(run_id = %run_id, workflow = workflow_name, "run created");
        Ok(run_id)
    }

    /// Latest snapshot of a run.
    pub fn run_status(&self, run_id: Uuid) -> Result<Run, EngineError> {
        self.runs
            .get(&run_id)
            .map(|handle| handle.snapshot.borrow().clone())
            .ok_or(EngineError::RunNotFound(run_id))
    }

    /// Request cancellation. Returns the status at the time of the request.
    ///
    /// A run that has already failed may still be draining in-flight steps;
    /// those are signalled too. A finished run is left alone.
    pub fn cancel_run(&self, run_id: Uuid) -> Result<RunStatus, EngineError> {
        let handle = self
            .runs
            .get(&run_id)
            .ok_or(EngineError::RunNotFound(run_id))?;
        let (status, finished) = {
            let run = handle.snapshot.borrow();
            (run.status, run.is_finished())
        };
        if !finished {
            tracing::info!(run_id = %run_id, status = ?status, "cancelling run");
            handle.cancel.cancel();
        }
        Ok(status)
    }

    /// Drop a finished run's snapshot and event history.
    pub fn forget_run(&self, run_id: Uuid) -> Result<(), EngineError> {
        let finished = self
            .runs
            .get(&run_id)
            .map(|handle| handle.snapshot.borrow().is_finished())
            .ok_or(EngineError::RunNotFound(run_id))?;
        if !finished {
            return Err(EngineError::RunActive(run_id));
        }
        self.runs.remove(&run_id);
        self.events.forget(run_id);
        tracing::debug!(run_id = %run_id, "forgot run");
        Ok(())
    }

    /// Subscribe to a run's events, optionally replaying from a sequence number.
    pub fn subscribe(
        &self,
        run_id: Uuid,
        from_sequence: Option<u64>,
    ) -> Result<EventStream, EngineError> {
        if !self.runs.contains_key(&run_id) {
            return Err(EngineError::RunNotFound(run_id));
        }
        self.events
            .subscribe(run_id, from_sequence)
            .ok_or(EngineError::RunNotFound(run_id))
    }

    /// Wait until the run has drained and closed, and return its final snapshot.
    pub async fn wait_for_run(&self, run_id: Uuid) -> Result<Run, EngineError> {
        let mut receiver = self
            .runs
            .get(&run_id)
            .map(|handle| handle.snapshot.clone())
            .ok_or(EngineError::RunNotFound(run_id))?;

        let waited = receiver.wait_for(Run::is_finished).await.map(|run| run.clone());
        // Sender gone without finishing means the scheduler task died; report what we have.
        Ok(match waited {
            Ok(run) => run,
            Err(_) => receiver.borrow().clone(),
        })
    }

    /// Snapshots of every known run, newest first.
    pub fn list_runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .map(|entry| entry.snapshot.borrow().clone())
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }
}

impl<S: RunScheduler> std::fmt::Debug for WorkflowEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("agents", &self.registry.len())
            .field("workflows", &self.catalog.len())
            .field("runs", &self.runs.len())
            .finish()
    }
}
