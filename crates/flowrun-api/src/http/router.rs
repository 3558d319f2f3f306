//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`. Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Workflows
        .route(
            "/workflows",
            post(handlers::workflow::register_workflow).get(handlers::workflow::list_workflows),
        )
        .route("/workflows/{name}", get(handlers::workflow::get_workflow))
        .route("/workflows/{name}/runs", post(handlers::workflow::create_run))
        // Runs
        .route("/runs", get(handlers::run::list_runs))
        .route(
            "/runs/{id}",
            get(handlers::run::get_run).delete(handlers::run::forget_run),
        )
        .route("/runs/{id}/cancel", post(handlers::run::cancel_run))
        .route("/runs/{id}/events", get(handlers::run::stream_events))
        // Agents
        .route("/agents", get(handlers::agent::list_agents))
        .route("/agents/{name}", delete(handlers::agent::deregister_agent))
        .route("/agents/{name}/health", get(handlers::agent::agent_health));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use flowrun_types::config::{AgentConfigEntry, AgentKind, EngineConfig};
    use serde_json::{Value, json};

    const PIPELINE: &str = r#"
workflow:
  name: pipeline
  version: "1"
steps:
  - id: ingest
    agent: echo
    config:
      source: feed
    outputs: [source]
  - id: digest
    agent: echo
    input_from: ingest
    outputs: [source]
"#;

    /// Serve the API on an ephemeral port with a single echo agent.
    async fn spawn_api() -> String {
        let config = EngineConfig {
            agents: vec![AgentConfigEntry {
                name: "echo".into(),
                kind: AgentKind::Echo,
                url: None,
                health_url: None,
                timeout_secs: None,
                description: None,
                capabilities: vec![],
                required_config: vec![],
            }],
            ..EngineConfig::default()
        };
        let state = AppState::from_config(config, PathBuf::from("/nonexistent/flowrun")).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let base = spawn_api().await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn register_run_and_replay_events() {
        let base = spawn_api().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/v1/workflows"))
            .body(PIPELINE)
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        let created: Value = client
            .post(format!("{base}/api/v1/workflows/pipeline/runs"))
            .json(&json!({"day": "monday"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let run_id = created["data"]["run_id"].as_str().unwrap().to_string();
        assert!(created["_links"]["events"].as_str().unwrap().contains(&run_id));

        // The stream ends after the terminal event, so the whole body arrives.
        let events = tokio::time::timeout(
            Duration::from_secs(5),
            client
                .get(format!("{base}/api/v1/runs/{run_id}/events?from_sequence=1"))
                .send()
                .await
                .unwrap()
                .text(),
        )
        .await
        .unwrap()
        .unwrap();
        let names: Vec<&str> = events
            .lines()
            .filter_map(|line| line.strip_prefix("event: "))
            .collect();
        assert_eq!(
            names,
            vec![
                "run_created",
                "step_started",
                "step_completed",
                "step_started",
                "step_completed",
                "run_completed",
            ]
        );

        let run: Value = client
            .get(format!("{base}/api/v1/runs/{run_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(run["data"]["status"], "completed");
        assert_eq!(run["data"]["steps"]["digest"]["outputs"]["source"], "feed");

        // Finished runs can be released; afterwards they are gone.
        let resp = client
            .delete(format!("{base}/api/v1/runs/{run_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
        let resp = client
            .get(format!("{base}/api/v1/runs/{run_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_workflow_is_rejected_with_issues() {
        let base = spawn_api().await;
        let client = reqwest::Client::new();
        let invalid = PIPELINE.replace("input_from: ingest", "input_from: missing");

        let resp = client
            .post(format!("{base}/api/v1/workflows"))
            .body(invalid)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["errors"][0]["code"], "INVALID_WORKFLOW");
        assert_eq!(body["errors"][0]["details"][0]["code"], "unknown_step_reference");

        // Remembered under its name: starting it reports the same problem.
        let resp = client
            .post(format!("{base}/api/v1/workflows/pipeline/runs"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn unknown_resources_are_not_found() {
        let base = spawn_api().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/v1/workflows/nope/runs"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        let resp = client
            .get(format!("{base}/api/v1/runs/{}", uuid::Uuid::now_v7()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        let resp = client
            .get(format!("{base}/api/v1/agents/ghost/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn agents_are_listed_and_checked() {
        let base = spawn_api().await;
        let client = reqwest::Client::new();

        let agents: Value = client
            .get(format!("{base}/api/v1/agents"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(agents["data"][0]["name"], "echo");

        let health: Value = client
            .get(format!("{base}/api/v1/agents/echo/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["data"]["healthy"], true);
        assert_eq!(health["data"]["registered"], true);

        // Deregistering twice is fine; the agent is gone afterwards.
        for _ in 0..2 {
            let resp = client
                .delete(format!("{base}/api/v1/agents/echo"))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
        }
        let resp = client
            .get(format!("{base}/api/v1/agents/echo/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
