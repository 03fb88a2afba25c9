//! `GET /v1/tenants/:tenant/usage`: usage totals and per-model breakdown.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Inclusive lower bound (RFC 3339).
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound (RFC 3339).
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

pub async fn usage_summary(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(q): Query<UsageQuery>,
) -> ApiResult<impl IntoResponse> {
    if let (Some(since), Some(until)) = (q.since, q.until) {
        if since >= until {
            return Err(ApiError::bad_request("since must be before until"));
        }
    }
    let partition = state.router.partition(&tenant_id)?;
    Ok(Json(partition.usage.summary(&tenant_id, q.since, q.until)))
}
