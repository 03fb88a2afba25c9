//! Shared, tenant-agnostic definitions.
//!
//! Templates live in the master registry and are read-only from the
//! supervisor's point of view. They are unversioned: an update replaces the
//! entry in place. Runs never hold a reference back to a template; they carry
//! a fully resolved snapshot instead (see [`crate::spec`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Agent,
    Prompt,
    Tool,
    McpServer,
    Model,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 5] = [
        Self::Agent,
        Self::Prompt,
        Self::Tool,
        Self::McpServer,
        Self::Model,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Prompt => "prompt",
            Self::Tool => "tool",
            Self::McpServer => "mcp_server",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "agent" | "agents" => Ok(Self::Agent),
            "prompt" | "prompts" => Ok(Self::Prompt),
            "tool" | "tools" => Ok(Self::Tool),
            "mcp_server" | "mcp_servers" | "mcp" => Ok(Self::McpServer),
            "model" | "models" => Ok(Self::Model),
            other => Err(Error::Validation(format!("unknown template kind '{other}'"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Agent template: the skeleton an instance is derived from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTemplate {
    pub agent_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub category: String,
    /// Id of a [`PromptTemplate`] to render as the system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_template: Option<String>,
    /// Inline prompt content, used when no prompt template id is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Id of the default [`ModelConfig`].
    pub default_model: String,
    #[serde(default)]
    pub default_tools: Vec<String>,
    #[serde(default)]
    pub default_mcp_servers: Vec<String>,
    #[serde(default)]
    pub default_builtin_tools: Vec<String>,
    /// Agent-level variable defaults; layered over the prompt template's.
    #[serde(default)]
    pub template_variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "d_true")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PromptVariable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// System prompt template with `{{variable}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptTemplate {
    pub prompt_id: String,
    pub name: String,
    pub template_content: String,
    #[serde(default)]
    pub variables: BTreeMap<String, PromptVariable>,
    #[serde(default)]
    pub category: String,
    #[serde(default = "d_true")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolEntry {
    pub tool_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `builtin`, `custom` or `mcp`.
    #[serde(default = "d_tool_type")]
    pub tool_type: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub parameters_schema: Value,
    #[serde(default = "d_true")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum McpServerType {
    #[default]
    Stdio,
    Http,
    Websocket,
}

/// External tool process (MCP server) registry entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpServerEntry {
    pub mcp_id: String,
    pub name: String,
    #[serde(default)]
    pub server_type: McpServerType,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "d_mcp_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub category: String,
    #[serde(default = "d_true")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Model-provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub config_id: String,
    /// Id of a configured provider adapter (`[[providers]] id`).
    pub provider: String,
    pub model_id: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Flat USD cost per token, used when no `[pricing]` entry matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_token: Option<f64>,
    #[serde(default)]
    pub category: String,
    #[serde(default = "d_true")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Common access
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Implemented by every registry entry type so the registry can store them
/// generically.
pub trait TemplateRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: TemplateKind;

    fn key(&self) -> &str;
    fn is_active(&self) -> bool;
    /// Borrow the typed record out of a tagged entry of the same kind.
    fn from_entry(entry: &TemplateEntry) -> Option<&Self>;
}

macro_rules! template_record {
    ($ty:ty, $variant:ident, $field:ident) => {
        impl TemplateRecord for $ty {
            const KIND: TemplateKind = TemplateKind::$variant;

            fn from_entry(entry: &TemplateEntry) -> Option<&Self> {
                match entry {
                    TemplateEntry::$variant(t) => Some(t),
                    _ => None,
                }
            }

            fn key(&self) -> &str {
                &self.$field
            }

            fn is_active(&self) -> bool {
                self.active
            }
        }
    };
}

template_record!(AgentTemplate, Agent, agent_id);
template_record!(PromptTemplate, Prompt, prompt_id);
template_record!(ToolEntry, Tool, tool_id);
template_record!(McpServerEntry, McpServer, mcp_id);
template_record!(ModelConfig, Model, config_id);

/// Any registry entry, tagged by kind. Used by the admin upsert path and by
/// the on-disk journal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "entry", rename_all = "snake_case")]
pub enum TemplateEntry {
    Agent(AgentTemplate),
    Prompt(PromptTemplate),
    Tool(ToolEntry),
    McpServer(McpServerEntry),
    Model(ModelConfig),
}

impl TemplateEntry {
    /// Parse an untagged JSON body as the given kind.
    pub fn from_json(kind: TemplateKind, body: Value) -> Result<Self> {
        let entry = match kind {
            TemplateKind::Agent => Self::Agent(serde_json::from_value(body)?),
            TemplateKind::Prompt => Self::Prompt(serde_json::from_value(body)?),
            TemplateKind::Tool => Self::Tool(serde_json::from_value(body)?),
            TemplateKind::McpServer => Self::McpServer(serde_json::from_value(body)?),
            TemplateKind::Model => Self::Model(serde_json::from_value(body)?),
        };
        if entry.key().is_empty() {
            return Err(Error::Validation(format!("{kind} id must not be empty")));
        }
        Ok(entry)
    }

    pub fn kind(&self) -> TemplateKind {
        match self {
            Self::Agent(_) => TemplateKind::Agent,
            Self::Prompt(_) => TemplateKind::Prompt,
            Self::Tool(_) => TemplateKind::Tool,
            Self::McpServer(_) => TemplateKind::McpServer,
            Self::Model(_) => TemplateKind::Model,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Agent(t) => t.key(),
            Self::Prompt(t) => t.key(),
            Self::Tool(t) => t.key(),
            Self::McpServer(t) => t.key(),
            Self::Model(t) => t.key(),
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            Self::Agent(t) => t.is_active(),
            Self::Prompt(t) => t.is_active(),
            Self::Tool(t) => t.is_active(),
            Self::McpServer(t) => t.is_active(),
            Self::Model(t) => t.is_active(),
        }
    }

    /// Free-form grouping label; empty when unset.
    pub fn category(&self) -> &str {
        match self {
            Self::Agent(t) => &t.category,
            Self::Prompt(t) => &t.category,
            Self::Tool(t) => &t.category,
            Self::McpServer(t) => &t.category,
            Self::Model(t) => &t.category,
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_tool_type() -> String {
    "builtin".into()
}
fn d_mcp_timeout() -> u64 {
    30
}
fn d_temperature() -> f32 {
    0.7
}
fn d_max_tokens() -> u32 {
    2000
}
