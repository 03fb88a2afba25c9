//! `GET /v1/health`: liveness plus a few runtime gauges.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let adapters: Vec<_> = state
        .adapters
        .list()
        .into_iter()
        .map(|(id, kind)| serde_json::json!({ "id": id, "kind": kind.as_str() }))
        .collect();

    Json(serde_json::json!({
        "status": "ok",
        "service": state.config.observability.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "tenants": state.router.list_tenants().len(),
        "strict_tenants": state.router.is_strict(),
        "adapters": adapters,
        "active_runs": state.supervisor.active_runs(),
        "max_concurrent_runs": state.supervisor.config().max_concurrent_runs,
    }))
}
