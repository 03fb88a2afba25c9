//! `GET /v1/tenants/:tenant/dashboard`: one-call tenant overview.

use af_domain::run::RunFilter;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use chrono::{Duration, Utc};

use super::error::ApiResult;
use crate::state::AppState;

const RECENT_RUNS: usize = 10;
const USAGE_WINDOW_DAYS: i64 = 30;

pub async fn tenant_dashboard(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let partition = state.router.partition(&tenant_id)?;

    let (recent, total_runs) = partition.runs.list(&RunFilter {
        limit: RECENT_RUNS,
        ..Default::default()
    });
    let recent: Vec<_> = recent
        .iter()
        .map(|r| {
            serde_json::json!({
                "run_id": r.run_id,
                "instance_id": r.instance_id,
                "state": r.state,
                "created_at": r.created_at,
                "duration_ms": r.duration_ms,
            })
        })
        .collect();

    let since = Utc::now() - Duration::days(USAGE_WINDOW_DAYS);
    let usage = partition.usage.summary(&tenant_id, Some(since), None);

    Ok(Json(serde_json::json!({
        "tenant_id": tenant_id,
        "instances": partition.instances.count(),
        "runs": {
            "total": total_runs,
            "by_state": partition.runs.status_counts(),
            "recent": recent,
        },
        "usage_30d": usage,
    })))
}
