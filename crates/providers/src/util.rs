//! Shared utility functions for provider adapters.

use std::future::Future;

use af_domain::config::ProviderConfig;
use af_domain::error::{Error, Result};
use af_domain::spec::ResolvedSpec;
use reqwest::StatusCode;
use serde_json::Value;

use crate::traits::{InvokeContext, Outcome};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Stable failure kind for a non-success HTTP status.
pub(crate) fn status_kind(status: StatusCode) -> &'static str {
    match status.as_u16() {
        429 => "rate_limited",
        401 | 403 => "auth_failed",
        404 => "model_not_found",
        408 | 504 => "provider_timeout",
        400..=499 => "bad_request",
        _ => "provider_error",
    }
}

/// Read the API key named by `api_key_env`. A provider without one sends
/// no credentials (local gateways, Ollama, ...).
pub(crate) fn resolve_api_key(cfg: &ProviderConfig) -> Result<Option<String>> {
    match &cfg.api_key_env {
        None => Ok(None),
        Some(var) => std::env::var(var).map(Some).map_err(|_| {
            Error::Config(format!(
                "provider '{}': environment variable '{var}' not set or not valid UTF-8",
                cfg.id
            ))
        }),
    }
}

pub(crate) fn required_base_url(cfg: &ProviderConfig) -> Result<String> {
    cfg.base_url
        .as_deref()
        .filter(|u| !u.is_empty())
        .map(|u| u.trim_end_matches('/').to_string())
        .ok_or_else(|| Error::Config(format!("provider '{}' requires base_url", cfg.id)))
}

/// The user turn sent to a chat model. Strings go through as-is; objects
/// with a `message` (or `prompt`) string use that; anything else is sent as
/// compact JSON.
pub(crate) fn user_text(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("prompt"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| input.to_string()),
        other => other.to_string(),
    }
}

/// Build the shared chat result payload.
pub(crate) fn chat_result(content: String, tool_calls: Vec<Value>, finish_reason: Option<String>) -> Value {
    let mut out = serde_json::json!({ "content": content });
    if !tool_calls.is_empty() {
        out["tool_calls"] = Value::Array(tool_calls);
    }
    if let Some(fr) = finish_reason {
        out["finish_reason"] = Value::String(fr);
    }
    out
}

/// Run `fut` unless the context is cancelled first.
pub(crate) async fn until_cancelled<F>(ctx: &InvokeContext, fut: F) -> Outcome
where
    F: Future<Output = Outcome>,
{
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Outcome::cancelled(),
        outcome = fut => outcome,
    }
}

/// Timeout for the HTTP client: the run deadline plus a little slack, so
/// the supervisor's own deadline normally fires first.
pub(crate) fn client_timeout(spec: &ResolvedSpec) -> std::time::Duration {
    std::time::Duration::from_secs(spec.timeout_secs.saturating_add(5))
}
