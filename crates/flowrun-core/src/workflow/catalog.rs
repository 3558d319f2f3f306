//! Named workflow registrations.
//!
//! The catalog keeps the last registration for each workflow name, valid or
//! not. Remembering invalid registrations lets `create_run` answer with the
//! validation report instead of a bare "unknown workflow".

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use flowrun_types::error::ValidationReport;
use flowrun_types::workflow::WorkflowDefinition;

use crate::agent::AgentRegistry;

use super::definition::{
    WorkflowError, discover_workflow_files, parse_workflow_document, validate_document,
};

/// A catalog entry.
#[derive(Debug, Clone)]
pub enum CatalogEntry {
    Valid(Arc<WorkflowDefinition>),
    Invalid(ValidationReport),
}

impl CatalogEntry {
    pub fn is_valid(&self) -> bool {
        matches!(self, CatalogEntry::Valid(_))
    }
}

#[derive(Debug, Default)]
pub struct WorkflowCatalog {
    entries: DashMap<String, CatalogEntry>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already-validated definition, replacing any previous one.
    pub fn register(&self, definition: WorkflowDefinition) -> Arc<WorkflowDefinition> {
        let definition = Arc::new(definition);
        self.entries
            .insert(definition.name.clone(), CatalogEntry::Valid(Arc::clone(&definition)));
        definition
    }

    /// Parse, validate, and register a YAML workflow.
    ///
    /// A document that fails validation but has a readable name is remembered
    /// as invalid under that name. Returns the validated definition or the
    /// error the caller should see.
    pub fn register_yaml(
        &self,
        yaml: &str,
        registry: Option<&AgentRegistry>,
    ) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        let doc = parse_workflow_document(yaml)?;
        match validate_document(&doc, registry) {
            Ok(definition) => {
                tracing::debug!(workflow = %definition.name, "registered workflow");
                Ok(self.register(definition))
            }
            Err(report) => {
                if let Some(name) = report.workflow.clone() {
                    tracing::warn!(
                        workflow = %name,
                        issues = report.len(),
                        "registered invalid workflow"
                    );
                    self.entries.insert(name, CatalogEntry::Invalid(report.clone()));
                }
                Err(WorkflowError::Validation(report))
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<CatalogEntry> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Every entry, sorted by name.
    pub fn list(&self) -> Vec<(String, CatalogEntry)> {
        let mut entries: Vec<(String, CatalogEntry)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register every workflow file under `dir`.
    ///
    /// Unreadable or unparseable files are skipped with a warning. Returns
    /// the number of files that registered as valid workflows.
    pub fn load_dir(
        &self,
        dir: &Path,
        registry: Option<&AgentRegistry>,
    ) -> Result<usize, WorkflowError> {
        let mut loaded = 0;
        for path in discover_workflow_files(dir)? {
            let yaml = match std::fs::read_to_string(&path) {
                Ok(yaml) => yaml,
                Err(e) => {
                    tracing::warn!(?path, error = %e, "skipping unreadable workflow file");
                    continue;
                }
            };
            match self.register_yaml(&yaml, registry) {
                Ok(_) => loaded += 1,
                Err(e) => tracing::warn!(?path, error = %e, "workflow file did not register"),
            }
        }
        Ok(loaded)
    }
}
