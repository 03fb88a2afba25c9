//! The immutable, fully merged configuration a run executes against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::template::McpServerType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedModel {
    /// Provider adapter id; selects the invocation adapter.
    pub provider: String,
    pub model_id: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_token: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedTool {
    pub tool_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tool_type: String,
    #[serde(default)]
    pub parameters_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedMcpServer {
    pub mcp_id: String,
    pub name: String,
    pub server_type: McpServerType,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

/// Snapshot stored on every run. Once built, nothing in it refers back to a
/// template or instance, so a run can be replayed even after those change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedSpec {
    pub tenant_id: String,
    pub instance_id: String,
    pub agent_id: String,
    pub name: String,
    pub system_prompt: String,
    /// Final merged variable map (call-time > instance > template).
    pub variables: BTreeMap<String, Value>,
    pub model: ResolvedModel,
    #[serde(default)]
    pub tools: Vec<ResolvedTool>,
    #[serde(default)]
    pub mcp_servers: Vec<ResolvedMcpServer>,
    #[serde(default)]
    pub builtin_tools: Vec<String>,
    pub timeout_secs: u64,
    #[serde(default)]
    pub custom_settings: BTreeMap<String, Value>,
}

impl ResolvedSpec {
    /// Canonical byte form. Maps are `BTreeMap`s and `serde_json` objects are
    /// sorted, so equal specs always serialize to equal bytes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Hex SHA-256 of [`Self::canonical_bytes`].
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = self.canonical_bytes()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn mcp_server_names(&self) -> Vec<String> {
        self.mcp_servers.iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
pub(crate) fn sample_spec() -> ResolvedSpec {
    ResolvedSpec {
        tenant_id: "acme".into(),
        instance_id: "inst-1".into(),
        agent_id: "analyst".into(),
        name: "Analyst".into(),
        system_prompt: "You analyse eu-west.".into(),
        variables: BTreeMap::from([("region".to_string(), Value::from("eu-west"))]),
        model: ResolvedModel {
            provider: "scripted".into(),
            model_id: "echo-1".into(),
            temperature: 0.2,
            max_tokens: 512,
            top_p: None,
            cost_per_token: None,
        },
        tools: Vec::new(),
        mcp_servers: Vec::new(),
        builtin_tools: Vec::new(),
        timeout_secs: 30,
        custom_settings: BTreeMap::new(),
    }
}
