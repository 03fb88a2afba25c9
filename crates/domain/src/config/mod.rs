mod observability;
mod providers;
mod server;
mod store;
mod supervisor;

pub use observability::*;
pub use providers::*;
pub use server::*;
pub use store::*;
pub use supervisor::*;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Registered invocation adapters.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Per-model pricing for cost derivation (key = model id).
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        if self.store.state_path.as_os_str().is_empty() {
            errors.push(ConfigError::error(
                "store.state_path",
                "state_path must not be empty",
            ));
        }
        if self.store.retry_attempts == 0 {
            errors.push(ConfigError::warning(
                "store.retry_attempts",
                "0 attempts is treated as 1 (no retry)",
            ));
        }

        let sup = &self.supervisor;
        if sup.max_concurrent_runs == 0 || sup.max_concurrent_runs > 256 {
            errors.push(ConfigError::warning(
                "supervisor.max_concurrent_runs",
                format!("{} is outside 1..=256 and will be clamped", sup.max_concurrent_runs),
            ));
        }
        if sup.subscriber_buffer < 8 || sup.subscriber_buffer > 4096 {
            errors.push(ConfigError::warning(
                "supervisor.subscriber_buffer",
                format!("{} is outside 8..=4096 and will be clamped", sup.subscriber_buffer),
            ));
        }

        if self.providers.is_empty() {
            errors.push(ConfigError::warning(
                "providers",
                "no providers configured; every run will fail with adapter_not_found",
            ));
        }

        let mut seen = HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError::error(
                    format!("providers[{i}].id"),
                    "provider id must not be empty",
                ));
            } else if !seen.insert(provider.id.as_str()) {
                errors.push(ConfigError::error(
                    format!("providers[{i}].id"),
                    format!("duplicate provider id '{}'", provider.id),
                ));
            }
            if provider.kind.needs_base_url()
                && provider.base_url.as_deref().map_or(true, str::is_empty)
            {
                errors.push(ConfigError::error(
                    format!("providers[{i}].base_url"),
                    format!("{} provider requires base_url", provider.kind.as_str()),
                ));
            }
            if provider.kind == ProviderKind::ToolProcess
                && provider.command.as_deref().map_or(true, str::is_empty)
            {
                errors.push(ConfigError::error(
                    format!("providers[{i}].command"),
                    "tool_process provider requires command",
                ));
            }
        }

        let obs = &self.observability;
        if obs.otlp_endpoint.is_some() && obs.endpoint().is_none() {
            errors.push(ConfigError::error(
                "observability.otlp_endpoint",
                "endpoint must start with http:// or https://",
            ));
        }
        if !(0.0..=1.0).contains(&obs.sample_rate) {
            errors.push(ConfigError::warning(
                "observability.sample_rate",
                format!("{} is outside 0.0..=1.0 and will be clamped", obs.sample_rate),
            ));
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }

    /// True when [`Self::validate`] reported at least one error.
    pub fn has_errors(issues: &[ConfigError]) -> bool {
        issues.iter().any(|e| e.severity == ConfigSeverity::Error)
    }
}
