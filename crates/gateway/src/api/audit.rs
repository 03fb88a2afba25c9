//! `GET /v1/tenants/:tenant/audit`: newest-first audit trail.

use af_domain::audit::AuditFilter;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use super::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn query_audit(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(q): Query<AuditQuery>,
) -> ApiResult<impl IntoResponse> {
    let partition = state.router.partition(&tenant_id)?;
    let entries = partition.audit.query(&AuditFilter {
        entity_type: q.entity_type,
        entity_id: q.entity_id,
        action: q.action,
        limit: q.limit.clamp(1, 1000),
    });
    Ok(Json(serde_json::json!({
        "count": entries.len(),
        "entries": entries,
    })))
}
