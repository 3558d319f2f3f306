//! Run status, cancellation, and event stream handlers.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use flowrun_types::run::Run;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Query parameters for the event stream.
#[derive(Debug, Deserialize, Default)]
pub struct EventsQuery {
    /// Replay retained events from this sequence number before going live.
    pub from_sequence: Option<u64>,
}

/// GET /api/v1/runs - Snapshots of every known run, newest first.
pub async fn list_runs(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Run>>>, AppError> {
    let start = Instant::now();
    Ok(Json(
        ApiResponse::success(state.engine.list_runs(), start).with_link("self", "/api/v1/runs"),
    ))
}

/// GET /api/v1/runs/{id} - Current run snapshot with every step's result.
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Run>>, AppError> {
    let start = Instant::now();
    let run = state.engine.run_status(run_id)?;
    Ok(Json(
        ApiResponse::success(run, start)
            .with_link("self", &format!("/api/v1/runs/{run_id}"))
            .with_link("events", &format!("/api/v1/runs/{run_id}/events")),
    ))
}

/// POST /api/v1/runs/{id}/cancel - Request cancellation.
///
/// Cancelling a run that already finished is a no-op; `cancelled` reports
/// whether the request had any effect. A failed run that is still draining
/// in-flight steps is cancelled too.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let finished = state.engine.run_status(run_id)?.is_finished();
    let status = state.engine.cancel_run(run_id)?;
    Ok(Json(
        ApiResponse::success(
            json!({
                "run_id": run_id,
                "status": status,
                "cancelled": !finished,
            }),
            start,
        )
        .with_link("self", &format!("/api/v1/runs/{run_id}")),
    ))
}

/// DELETE /api/v1/runs/{id} - Forget a finished run and its event history.
pub async fn forget_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.engine.forget_run(run_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/runs/{id}/events - Server-Sent Events stream of run events.
///
/// Each SSE event is named after the event type, carries the sequence
/// number as its id, and has the JSON event as data. The stream ends after
/// the run's terminal event. A subscriber that falls too far behind gets a
/// final `lagged` event.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let events = state.engine.subscribe(run_id, query.from_sequence)?;

    let sse_stream = events.map(|item| {
        let event = match item {
            Ok(event) => Event::default()
                .event(event.kind.kind_name())
                .id(event.sequence.to_string())
                .data(serde_json::to_string(&event).unwrap_or_default()),
            Err(e) => Event::default()
                .event("lagged")
                .data(json!({ "error": e.to_string() }).to_string()),
        };
        Ok::<_, Infallible>(event)
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
