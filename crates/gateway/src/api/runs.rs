//! Run API endpoints.
//!
//! - `POST /v1/tenants/:tenant/runs`: create (async by default)
//! - `GET  /v1/tenants/:tenant/runs`: list runs with filters
//! - `GET  /v1/tenants/:tenant/runs/:id`: get a single run
//! - `POST /v1/tenants/:tenant/runs/:id/cancel`: cancel
//! - `GET  /v1/tenants/:tenant/runs/:id/events`: event stream (snapshot, then live events)

use std::collections::BTreeMap;
use std::convert::Infallible;

use af_domain::event::RunEvent;
use af_domain::run::{RunFilter, RunState};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::error::ApiResult;
use crate::runtime::CreateRun;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tenants/:tenant/runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateRunBody {
    pub instance_id: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// When false, block until the run settles (bounded by
    /// `supervisor.sync_wait_secs`).
    #[serde(default = "d_true", rename = "async")]
    pub run_async: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn d_true() -> bool {
    true
}

pub async fn create_run(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(body): Json<CreateRunBody>,
) -> ApiResult<impl IntoResponse> {
    let wait = !body.run_async;
    let run = state
        .supervisor
        .create_run(
            &tenant_id,
            CreateRun {
                instance_id: body.instance_id,
                input: body.input,
                variables: body.variables,
                metadata: body.metadata,
                wait,
                created_by: body.created_by,
            },
        )
        .await?;

    let status = if run.state.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(run)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tenants/:tenant/runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_runs(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(q): Query<ListRunsQuery>,
) -> ApiResult<impl IntoResponse> {
    let run_state = q.state.as_deref().map(str::parse::<RunState>).transpose()?;
    let limit = q.limit.clamp(1, 200);
    let filter = RunFilter {
        state: run_state,
        instance_id: q.instance_id,
        agent_id: q.agent_id,
        limit,
        offset: q.offset,
    };
    let (runs, total) = state.supervisor.list_runs(&tenant_id, &filter).await?;

    // Lightweight list view: no resolved spec or transition history.
    let items: Vec<Value> = runs
        .iter()
        .map(|r| {
            serde_json::json!({
                "run_id": r.run_id,
                "instance_id": r.instance_id,
                "agent_id": r.agent_id,
                "state": r.state,
                "created_at": r.created_at,
                "started_at": r.started_at,
                "ended_at": r.ended_at,
                "duration_ms": r.duration_ms,
                "model_used": r.model_used,
                "usage": r.usage,
                "error": r.error,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "runs": items,
        "total": total,
        "limit": limit,
        "offset": q.offset,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tenants/:tenant/runs/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_run(
    State(state): State<AppState>,
    Path((tenant_id, run_id)): Path<(String, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.supervisor.get_run(&tenant_id, &run_id).await?))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tenants/:tenant/runs/:id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub cancelled_by: Option<String>,
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path((tenant_id, run_id)): Path<(String, Uuid)>,
    body: Option<Json<CancelBody>>,
) -> ApiResult<impl IntoResponse> {
    let actor = body.and_then(|Json(b)| b.cancelled_by);
    let ack = state
        .supervisor
        .cancel_run(&tenant_id, &run_id, actor)
        .await?;
    Ok(Json(ack))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tenants/:tenant/runs/:id/events (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run_events_sse(
    State(state): State<AppState>,
    Path((tenant_id, run_id)): Path<(String, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    let attachment = state.supervisor.attach(&tenant_id, &run_id).await?;
    let snapshot = RunEvent::snapshot(&attachment.snapshot);
    let stream = make_run_event_stream(snapshot, attachment.live);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &RunEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event.name()).data(data)
}

/// Snapshot first; then live events until a terminal one. A run that was
/// already terminal on attach has no live receiver and the stream ends after
/// the snapshot.
fn make_run_event_stream(
    snapshot: RunEvent,
    live: Option<broadcast::Receiver<RunEvent>>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        yield Ok(sse_event(&snapshot));
        let Some(mut rx) = live else {
            return;
        };
        loop {
            match rx.recv().await {
                Ok(event) => {
                    yield Ok(sse_event(&event));
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    let msg = serde_json::json!({ "warning": format!("missed {n} events") });
                    yield Ok(Event::default().event("warning").data(msg.to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}
