//! Agent listing and health check handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{Value, json};

use flowrun_types::agent::AgentInfo;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/agents - Registered agents with their metadata.
pub async fn list_agents(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<AgentInfo>>>, AppError> {
    let start = Instant::now();
    Ok(Json(
        ApiResponse::success(state.engine.registry().list(), start)
            .with_link("self", "/api/v1/agents"),
    ))
}

/// DELETE /api/v1/agents/{name} - Deregister an agent.
///
/// Idempotent. Runs that already resolved the agent keep their handle.
pub async fn deregister_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> StatusCode {
    state.engine.registry().deregister(&name);
    StatusCode::NO_CONTENT
}

/// GET /api/v1/agents/{name}/health - Check one agent health.
///
/// Repeated failures past the configured threshold deregister the agent;
/// `registered` reports whether it is still present after this check.
pub async fn agent_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let registry = state.engine.registry();
    if !registry.contains(&name) {
        return Err(AppError::NotFound(format!("Agent '{name}' not found")));
    }

    let healthy = registry.health_check(&name).await;
    let failures = registry
        .list()
        .into_iter()
        .find(|a| a.name == name)
        .map(|a| a.consecutive_failures);

    Ok(Json(ApiResponse::success(
        json!({
            "name": name,
            "healthy": healthy,
            "registered": failures.is_some(),
            "consecutive_failures": failures.unwrap_or(0),
        }),
        start,
    )))
}
