//! Tenant-scoped agent instances.
//!
//! - `POST  /v1/tenants/:tenant/instances`
//! - `GET   /v1/tenants/:tenant/instances`
//! - `GET   /v1/tenants/:tenant/instances/:id`
//! - `PATCH /v1/tenants/:tenant/instances/:id`

use af_domain::audit::AuditEntry;
use af_domain::error::Error;
use af_domain::instance::{Instance, InstanceUpdate, NewInstance};
use af_domain::template::{AgentTemplate, TemplateKind, TemplateRecord};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tenants/:tenant/instances
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_instance(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<NewInstance>,
) -> ApiResult<impl IntoResponse> {
    let partition = state.router.partition(&tenant_id)?;

    // The instance must derive from an active agent template.
    let snapshot = state
        .router
        .templates()
        .snapshot_for(TemplateKind::Agent, &req.agent_id)?;
    let agent = snapshot
        .get(TemplateKind::Agent, &req.agent_id)
        .and_then(AgentTemplate::from_entry)
        .filter(|a| a.is_active())
        .ok_or_else(|| Error::TemplateNotFound {
            kind: TemplateKind::Agent.to_string(),
            id: req.agent_id.clone(),
        })?;

    let actor = req.created_by.clone();
    let instance = partition
        .instances
        .create(Instance::create(&tenant_id, req, &agent.name)?)?;

    let entry = AuditEntry::new(&tenant_id, "instance", &instance.instance_id, "create")
        .actor(actor)
        .detail(serde_json::json!({ "agent_id": instance.agent_id, "name": instance.name }));
    if let Err(e) = partition.audit.record(entry) {
        tracing::warn!(tenant_id = %tenant_id, error = %e, "audit write failed");
    }
    tracing::info!(tenant_id = %tenant_id, instance_id = %instance.instance_id, "instance created");

    Ok((StatusCode::CREATED, Json(instance)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tenants/:tenant/instances
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListInstancesQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_instances(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(q): Query<ListInstancesQuery>,
) -> ApiResult<impl IntoResponse> {
    let partition = state.router.partition(&tenant_id)?;
    let instances = partition.instances.list(q.include_inactive);
    Ok(Json(serde_json::json!({
        "count": instances.len(),
        "instances": instances,
    })))
}

pub async fn get_instance(
    State(state): State<AppState>,
    Path((tenant_id, instance_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let partition = state.router.partition(&tenant_id)?;
    Ok(Json(partition.instances.get(&instance_id)?))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PATCH /v1/tenants/:tenant/instances/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PatchInstanceBody {
    #[serde(flatten)]
    pub update: InstanceUpdate,
    #[serde(default)]
    pub updated_by: Option<String>,
}

pub async fn update_instance(
    State(state): State<AppState>,
    Path((tenant_id, instance_id)): Path<(String, String)>,
    Json(body): Json<PatchInstanceBody>,
) -> ApiResult<impl IntoResponse> {
    if body.update.name.as_deref().is_some_and(str::is_empty) {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    let partition = state.router.partition(&tenant_id)?;
    let (before, after) = partition.instances.update(&instance_id, body.update)?;

    let entry = AuditEntry::new(&tenant_id, "instance", &instance_id, "update")
        .actor(body.updated_by)
        .detail(serde_json::json!({ "before": before, "after": after }));
    if let Err(e) = partition.audit.record(entry) {
        tracing::warn!(tenant_id = %tenant_id, error = %e, "audit write failed");
    }

    Ok(Json(after))
}
