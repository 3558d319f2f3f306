//! Application state wiring the engine together.
//!
//! AppState holds the engine used by both CLI commands and REST handlers,
//! built from `config.toml` in the data directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use flowrun_core::workflow::WorkflowEngine;
use flowrun_infra::agent::build_registry;
use flowrun_infra::config::load_engine_config;
use flowrun_infra::filesystem::{resolve_data_dir, workflow_dir};
use flowrun_types::config::EngineConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load config from the data directory and wire the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        let config = load_engine_config(&data_dir).await;
        Self::from_config(config, data_dir)
    }

    /// Register configured agents, then every workflow file in the
    /// workflow directory if it exists.
    pub fn from_config(config: EngineConfig, data_dir: PathBuf) -> anyhow::Result<Self> {
        let registry = build_registry(&config).context("Failed to register configured agents")?;
        let workflows = workflow_dir(&data_dir, config.workflow_dir.as_deref());
        let engine = WorkflowEngine::new(config, Arc::new(registry));

        if workflows.is_dir() {
            let loaded = engine
                .catalog()
                .load_dir(&workflows, Some(engine.registry().as_ref()))
                .with_context(|| format!("Failed to load workflows from {}", workflows.display()))?;
            tracing::info!(dir = %workflows.display(), loaded, "registered workflows");
        }

        Ok(Self {
            engine: Arc::new(engine),
            data_dir,
        })
    }
}
