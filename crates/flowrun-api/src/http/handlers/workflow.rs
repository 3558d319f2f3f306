//! Workflow registration and run creation handlers.

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use flowrun_core::workflow::CatalogEntry;
use flowrun_types::workflow::WorkflowDefinition;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

fn definition_json(def: &WorkflowDefinition) -> Value {
    json!({
        "name": def.name,
        "version": def.version,
        "description": def.description,
        "valid": true,
        "steps": def.steps,
    })
}

/// POST /api/v1/workflows - Register a workflow from a YAML body.
///
/// A workflow that fails validation is still remembered under its name, so
/// a later run request reports the same issues.
pub async fn register_workflow(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let def = state.engine.register_workflow_yaml(&body)?;

    let resp = ApiResponse::success(definition_json(&def), start)
        .with_link("self", &format!("/api/v1/workflows/{}", def.name))
        .with_link("runs", &format!("/api/v1/workflows/{}/runs", def.name));
    Ok(Json(resp))
}

/// GET /api/v1/workflows - List registered workflows, valid or not.
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Value>>>, AppError> {
    let start = Instant::now();
    let entries: Vec<Value> = state
        .engine
        .catalog()
        .list()
        .into_iter()
        .map(|(name, entry)| match entry {
            CatalogEntry::Valid(def) => json!({
                "name": name,
                "version": def.version,
                "valid": true,
                "steps": def.steps.len(),
            }),
            CatalogEntry::Invalid(report) => json!({
                "name": name,
                "valid": false,
                "issues": report.len(),
            }),
        })
        .collect();

    Ok(Json(
        ApiResponse::success(entries, start).with_link("self", "/api/v1/workflows"),
    ))
}

/// GET /api/v1/workflows/{name} - A workflow definition, or its validation issues.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let data = match state.engine.catalog().get(&name) {
        Some(CatalogEntry::Valid(def)) => definition_json(&def),
        Some(CatalogEntry::Invalid(report)) => json!({
            "name": name,
            "valid": false,
            "issues": report.issues,
        }),
        None => return Err(AppError::NotFound(format!("Workflow '{name}' not found"))),
    };

    Ok(Json(
        ApiResponse::success(data, start)
            .with_link("self", &format!("/api/v1/workflows/{name}"))
            .with_link("runs", &format!("/api/v1/workflows/{name}/runs")),
    ))
}

/// POST /api/v1/workflows/{name}/runs - Start a run.
///
/// The body, if any, is the run's initial input as JSON. An empty body
/// starts the run with an empty object.
pub async fn create_run(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let initial_input: Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Run input is not valid JSON: {e}")))?
    };

    let run_id = state.engine.create_run(&name, initial_input)?;

    let resp = ApiResponse::success(
        json!({
            "run_id": run_id,
            "workflow_name": name,
            "status": "running",
        }),
        start,
    )
    .with_link("self", &format!("/api/v1/runs/{run_id}"))
    .with_link("events", &format!("/api/v1/runs/{run_id}/events?from_sequence=1"))
    .with_link("cancel", &format!("/api/v1/runs/{run_id}/cancel"));
    Ok(Json(resp))
}
