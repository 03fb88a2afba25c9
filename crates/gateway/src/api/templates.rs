//! Master template registry administration.
//!
//! - `PUT /v1/templates/:kind/:id`: insert or replace an entry
//! - `GET /v1/templates/:kind/:id`: one entry, inactive included
//! - `GET /v1/templates/:kind`: list entries of one kind, optionally by
//!   `category` (and `provider` for model configs)

use af_domain::error::Error;
use af_domain::template::{TemplateEntry, TemplateKind};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::Value;

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn put_template(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let kind: TemplateKind = kind.parse()?;
    let entry = TemplateEntry::from_json(kind, body)?;
    if entry.key() != id {
        return Err(ApiError::bad_request(format!(
            "{kind} id in body ('{}') does not match path ('{id}')",
            entry.key()
        )));
    }
    state.router.templates().upsert(entry.clone())?;
    tracing::info!(kind = %kind, id = %id, "template upserted");
    Ok(Json(entry))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let kind: TemplateKind = kind.parse()?;
    let snapshot = state.router.templates().snapshot_for(kind, &id)?;
    let entry = snapshot
        .get(kind, &id)
        .cloned()
        .ok_or_else(|| Error::TemplateNotFound {
            kind: kind.to_string(),
            id: id.clone(),
        })?;
    Ok(Json(entry))
}

#[derive(Debug, Deserialize)]
pub struct ListTemplatesQuery {
    #[serde(default)]
    pub include_inactive: bool,
    #[serde(default)]
    pub category: Option<String>,
    /// Model configs only.
    #[serde(default)]
    pub provider: Option<String>,
}

impl ListTemplatesQuery {
    fn matches(&self, entry: &TemplateEntry) -> bool {
        let category = self
            .category
            .as_deref()
            .map_or(true, |c| entry.category() == c);
        let provider = match (&self.provider, entry) {
            (Some(p), TemplateEntry::Model(m)) => m.provider == *p,
            (Some(_), _) => false,
            (None, _) => true,
        };
        category && provider
    }
}

pub async fn list_templates(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(q): Query<ListTemplatesQuery>,
) -> ApiResult<impl IntoResponse> {
    let kind: TemplateKind = kind.parse()?;
    let entries = state
        .router
        .templates()
        .snapshot()
        .list(kind, q.include_inactive)
        .into_iter()
        .filter(|e| q.matches(e))
        .collect::<Vec<_>>();
    Ok(Json(serde_json::json!({
        "kind": kind,
        "count": entries.len(),
        "templates": entries,
    })))
}
