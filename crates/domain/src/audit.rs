use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Immutable record of a state-changing operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// `instance`, `run`, `tenant`, ...
    pub entity_type: String,
    pub entity_id: String,
    /// `create`, `update`, `start`, `complete`, `fail`, `cancel`, `timeout`.
    pub action: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub detail: Value,
    /// When set, re-recording the same key is a no-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: &str,
        entity_type: &str,
        entity_id: impl Into<String>,
        action: &str,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_owned(),
            actor: None,
            entity_type: entity_type.to_owned(),
            entity_id: entity_id.into(),
            action: action.to_owned(),
            timestamp: Utc::now(),
            detail: Value::Null,
            dedup_key: None,
        }
    }

    pub fn actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn dedup(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub limit: usize,
}

impl AuditFilter {
    pub fn matches(&self, e: &AuditEntry) -> bool {
        self.entity_type.as_deref().map_or(true, |v| e.entity_type == v)
            && self.entity_id.as_deref().map_or(true, |v| e.entity_id == v)
            && self.action.as_deref().map_or(true, |v| e.action == v)
    }
}
