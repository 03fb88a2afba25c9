use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation adapters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configured adapter. Model configs in the master registry refer to
/// it by `id` (`ModelConfig::provider`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    /// Required for the HTTP kinds.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Executable for `tool_process`.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
    /// AWS Bedrock through an OpenAI-compatible gateway.
    Bedrock,
    /// Local executable speaking one JSON request/response per invocation.
    ToolProcess,
    /// Deterministic in-process adapter for development and tests.
    Scripted,
}

impl ProviderKind {
    pub fn needs_base_url(self) -> bool {
        matches!(self, Self::OpenaiCompat | Self::Anthropic | Self::Bedrock)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenaiCompat => "openai_compat",
            Self::Anthropic => "anthropic",
            Self::Bedrock => "bedrock",
            Self::ToolProcess => "tool_process",
            Self::Scripted => "scripted",
        }
    }
}

/// Pricing per million units for a specific model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Dollars per 1 million input units.
    pub input_per_1m: f64,
    /// Dollars per 1 million output units.
    pub output_per_1m: f64,
}

impl ModelPricing {
    pub fn estimate_cost(&self, input_units: u64, output_units: u64) -> f64 {
        (input_units as f64 * self.input_per_1m + output_units as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}
