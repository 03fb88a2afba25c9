//! Tenant administration.
//!
//! - `POST /v1/tenants`: register a tenant (creates its partition)
//! - `GET  /v1/tenants`: list active tenants
//! - `GET  /v1/tenants/:tenant`: get one tenant

use af_domain::audit::AuditEntry;
use af_domain::tenant::NewTenant;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use super::error::ApiResult;
use crate::state::AppState;

pub async fn create_tenant(
    State(state): State<AppState>,
    Json(req): Json<NewTenant>,
) -> ApiResult<impl IntoResponse> {
    let actor = req.created_by.clone();
    let tenant = state.router.create_tenant(req)?;

    let partition = state.router.partition(&tenant.tenant_id)?;
    let entry = AuditEntry::new(&tenant.tenant_id, "tenant", &tenant.tenant_id, "create")
        .actor(actor)
        .detail(serde_json::json!({ "partition": tenant.partition }));
    if let Err(e) = partition.audit.record(entry) {
        tracing::warn!(tenant_id = %tenant.tenant_id, error = %e, "audit write failed");
    }

    Ok((StatusCode::CREATED, Json(tenant)))
}

pub async fn list_tenants(State(state): State<AppState>) -> impl IntoResponse {
    let tenants = state.router.list_tenants();
    Json(serde_json::json!({
        "count": tenants.len(),
        "tenants": tenants,
    }))
}

pub async fn get_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.router.get_tenant(&tenant_id)?))
}
