use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::tenant::validate_id;

/// Per-instance overrides of the template's model configuration. Unset
/// fields fall through to the referenced [`crate::template::ModelConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelOverrides {
    /// Swap the model configuration entirely (config id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

/// Tenant-owned configuration derived from one agent template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub instance_id: String,
    pub tenant_id: String,
    /// Agent template this instance derives from.
    pub agent_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Literal prompt; when set it replaces the template render.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub model: ModelOverrides,
    /// Tool ids; empty means "use the template defaults".
    #[serde(default)]
    pub tools: Vec<String>,
    /// MCP server ids; empty means "use the template defaults".
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin_tools: Option<Vec<String>>,
    #[serde(default)]
    pub custom_settings: BTreeMap<String, Value>,
    #[serde(default = "d_true")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NewInstance {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub agent_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub model: ModelOverrides,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default)]
    pub builtin_tools: Option<Vec<String>>,
    #[serde(default)]
    pub custom_settings: BTreeMap<String, Value>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct InstanceUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub variables: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub model: Option<ModelOverrides>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub mcp_servers: Option<Vec<String>>,
    #[serde(default)]
    pub builtin_tools: Option<Vec<String>>,
    #[serde(default)]
    pub custom_settings: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl Instance {
    /// Build an instance for `tenant_id`. `default_name` is the template's
    /// name, used when the request does not carry one.
    pub fn create(tenant_id: &str, req: NewInstance, default_name: &str) -> Result<Self> {
        let instance_id = req
            .instance_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        validate_id("instance_id", &instance_id)?;
        let now = Utc::now();
        Ok(Self {
            instance_id,
            tenant_id: tenant_id.to_owned(),
            agent_id: req.agent_id,
            name: req.name.unwrap_or_else(|| default_name.to_owned()),
            description: req.description,
            system_prompt: req.system_prompt,
            variables: req.variables,
            model: req.model,
            tools: req.tools,
            mcp_servers: req.mcp_servers,
            builtin_tools: req.builtin_tools,
            custom_settings: req.custom_settings,
            active: true,
            created_at: now,
            updated_at: now,
            created_by: req.created_by,
        })
    }

    pub fn apply(&mut self, update: InstanceUpdate) {
        if let Some(v) = update.name {
            self.name = v;
        }
        if let Some(v) = update.description {
            self.description = Some(v);
        }
        if let Some(v) = update.system_prompt {
            self.system_prompt = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = update.variables {
            self.variables = v;
        }
        if let Some(v) = update.model {
            self.model = v;
        }
        if let Some(v) = update.tools {
            self.tools = v;
        }
        if let Some(v) = update.mcp_servers {
            self.mcp_servers = v;
        }
        if let Some(v) = update.builtin_tools {
            self.builtin_tools = Some(v);
        }
        if let Some(v) = update.custom_settings {
            self.custom_settings = v;
        }
        if let Some(v) = update.active {
            self.active = v;
        }
        self.updated_at = Utc::now();
    }

    /// `custom_settings.timeout` in seconds, if present and positive.
    pub fn timeout_override_secs(&self) -> Option<u64> {
        self.custom_settings
            .get("timeout")
            .and_then(Value::as_u64)
            .filter(|t| *t > 0)
    }
}

fn d_true() -> bool {
    true
}
