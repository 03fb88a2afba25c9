//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure-style gateways, Ollama, vLLM, LM Studio, Together,
//! and any other endpoint that follows the OpenAI chat completions contract.

use af_domain::config::{ProviderConfig, ProviderKind};
use af_domain::error::{Error, Result};
use af_domain::spec::{ResolvedSpec, ResolvedTool};
use af_domain::usage::UsageCounters;
use serde_json::Value;

use crate::tool_loop::{tool_rounds, ToolRound};
use crate::traits::{InvokeContext, Invoker, Outcome};
use crate::util::{
    chat_result, client_timeout, from_reqwest, required_base_url, resolve_api_key, status_kind,
    until_cancelled, user_text,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatAdapter {
    id: String,
    kind: ProviderKind,
    base_url: String,
    api_key: Option<String>,
    default_model: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    /// Create a new adapter from the deserialized provider config.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            id: cfg.id.clone(),
            kind: cfg.kind,
            base_url: required_base_url(cfg)?,
            api_key: resolve_api_key(cfg)?,
            default_model: cfg.default_model.clone(),
            client: reqwest::Client::builder().build().map_err(from_reqwest)?,
        })
    }

    // ── Internal: build authenticated request builder ──────────────

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn effective_model<'a>(&'a self, spec: &'a ResolvedSpec) -> &'a str {
        if spec.model.model_id.is_empty() {
            self.default_model.as_deref().unwrap_or("gpt-4o")
        } else {
            &spec.model.model_id
        }
    }

    pub(crate) fn build_chat_body(&self, spec: &ResolvedSpec, input: &Value) -> Value {
        let mut messages = Vec::new();
        if !spec.system_prompt.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": spec.system_prompt}));
        }
        messages.push(serde_json::json!({"role": "user", "content": user_text(input)}));
        for round in tool_rounds(input) {
            push_round(&mut messages, &round);
        }

        let mut body = serde_json::json!({
            "model": self.effective_model(spec),
            "messages": messages,
            "temperature": spec.model.temperature,
            "max_tokens": spec.model.max_tokens,
            "stream": false,
        });
        if let Some(top_p) = spec.model.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if !spec.tools.is_empty() {
            body["tools"] = Value::Array(spec.tools.iter().map(tool_to_openai).collect());
        }
        body
    }

    async fn call(&self, spec: &ResolvedSpec, input: &Value) -> Outcome {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(spec, input);

        tracing::debug!(provider = %self.id, url = %url, "openai_compat chat request");

        let resp = match self
            .authed_post(&url)
            .timeout(client_timeout(spec))
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Outcome::from_error(&from_reqwest(e)),
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => return Outcome::from_error(&from_reqwest(e)),
        };
        if !status.is_success() {
            return Outcome::failure(
                status_kind(status),
                format!("HTTP {} - {}", status.as_u16(), text),
            );
        }

        match serde_json::from_str::<Value>(&text)
            .map_err(Error::from)
            .and_then(|v| parse_chat_response(&v))
        {
            Ok(outcome) => outcome,
            Err(e) => Outcome::from_error(&e),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn tool_to_openai(tool: &ResolvedTool) -> Value {
    let parameters = if tool.parameters_schema.is_null() {
        serde_json::json!({"type": "object", "properties": {}})
    } else {
        tool.parameters_schema.clone()
    };
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description.clone().unwrap_or_default(),
            "parameters": parameters,
        }
    })
}

/// An assistant turn with its tool calls, then one `tool` message per result.
fn push_round(messages: &mut Vec<Value>, round: &ToolRound) {
    let calls: Vec<Value> = round
        .calls
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "type": "function",
                "function": {"name": c.name, "arguments": c.arguments.to_string()},
            })
        })
        .collect();
    let content = if round.content.is_empty() {
        Value::Null
    } else {
        Value::String(round.content.clone())
    };
    messages.push(serde_json::json!({"role": "assistant", "content": content, "tool_calls": calls}));
    for result in &round.results {
        messages.push(serde_json::json!({
            "role": "tool",
            "tool_call_id": result.call_id,
            "content": result.content,
        }));
    }
}

/// `{"id", "name", "arguments"}` from an OpenAI tool call, where the
/// arguments arrive as a JSON-encoded string.
fn normalize_tool_call(raw: &Value) -> Value {
    let function = raw.get("function");
    let arguments = match function.and_then(|f| f.get("arguments")) {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Some(other) => other.clone(),
        None => Value::Null,
    };
    serde_json::json!({
        "id": raw.get("id").and_then(Value::as_str).unwrap_or_default(),
        "name": function.and_then(|f| f.get("name")).and_then(Value::as_str).unwrap_or_default(),
        "arguments": arguments,
    })
}

pub(crate) fn parse_chat_response(body: &Value) -> Result<Outcome> {
    let invalid = |message: &str| Error::Adapter {
        kind: "invalid_response".into(),
        detail: message.into(),
    };
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| invalid("no choices in response"))?;
    let message = choice
        .get("message")
        .ok_or_else(|| invalid("no message in choice"))?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| calls.iter().map(normalize_tool_call).collect())
        .unwrap_or_default();
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);
    let usage = body
        .get("usage")
        .map(|u| UsageCounters {
            input_units: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_units: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
            cost: 0.0,
        })
        .unwrap_or_default();

    Ok(Outcome::Success {
        result: chat_result(content, tool_calls, finish_reason),
        usage,
        model: body.get("model").and_then(|v| v.as_str()).map(String::from),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl Invoker for OpenAiCompatAdapter {
    async fn invoke(&self, spec: &ResolvedSpec, input: &Value, ctx: &InvokeContext) -> Outcome {
        until_cancelled(ctx, self.call(spec, input)).await
    }

    fn adapter_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ResolvedSpec {
        serde_json::from_value(serde_json::json!({
            "tenant_id": "acme",
            "instance_id": "i1",
            "agent_id": "analyst",
            "name": "Analyst",
            "system_prompt": "Be brief.",
            "variables": {},
            "model": {"provider": "openai", "model_id": "gpt-4o-mini", "temperature": 0.2, "max_tokens": 64},
            "tools": [{"tool_id": "s", "name": "search", "tool_type": "builtin", "parameters_schema": null}],
            "timeout_secs": 30
        }))
        .unwrap()
    }

    fn adapter() -> OpenAiCompatAdapter {
        OpenAiCompatAdapter::from_config(&ProviderConfig {
            id: "openai".into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: Some("http://127.0.0.1:9/v1".into()),
            api_key_env: None,
            default_model: None,
            command: None,
            args: Vec::new(),
            env: Default::default(),
        })
        .unwrap()
    }

    #[test]
    fn body_carries_prompt_model_and_tools() {
        let body = adapter().build_chat_body(&spec(), &serde_json::json!({"message": "hi"}));
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["tools"][0]["function"]["name"], "search");
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn parses_content_and_usage() {
        let body = serde_json::json!({
            "model": "gpt-4o-mini-2024",
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        });
        match parse_chat_response(&body).unwrap() {
            Outcome::Success { result, usage, model } => {
                assert_eq!(result["content"], "hello");
                assert_eq!(usage.input_units, 12);
                assert_eq!(usage.output_units, 3);
                assert_eq!(model.as_deref(), Some("gpt-4o-mini-2024"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tool_calls_are_normalized() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "call_1", "type": "function",
                         "function": {"name": "lookup", "arguments": "{\"city\":\"paris\"}"}},
                        {"id": "call_2", "type": "function",
                         "function": {"name": "raw", "arguments": "not json"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        });
        match parse_chat_response(&body).unwrap() {
            Outcome::Success { result, .. } => {
                assert_eq!(result["content"], "");
                assert_eq!(result["tool_calls"][0]["name"], "lookup");
                assert_eq!(result["tool_calls"][0]["arguments"]["city"], "paris");
                assert_eq!(result["tool_calls"][1]["arguments"], "not json");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tool_rounds_become_assistant_and_tool_messages() {
        let input = serde_json::json!({
            "message": "weather in paris?",
            "tool_rounds": [{
                "content": "checking",
                "calls": [{"id": "call_1", "name": "lookup", "arguments": {"city": "paris"}}],
                "results": [{"call_id": "call_1", "name": "lookup", "content": "sunny"}]
            }]
        });
        let body = adapter().build_chat_body(&spec(), &input);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1]["content"], "weather in paris?");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[2]["tool_calls"][0]["function"]["arguments"], r#"{"city":"paris"}"#);
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_1");
        assert_eq!(messages[3]["content"], "sunny");
    }

    #[test]
    fn missing_choices_is_invalid_response() {
        let err = parse_chat_response(&serde_json::json!({})).unwrap_err();
        match Outcome::from_error(&err) {
            Outcome::Failure { kind, .. } => assert_eq!(kind, "invalid_response"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_before_call_returns_cancelled() {
        let ctx = InvokeContext::new(uuid::Uuid::nil(), tokio_util::sync::CancellationToken::new());
        ctx.cancel.cancel();
        let out = adapter().invoke(&spec(), &Value::Null, &ctx).await;
        assert_eq!(out, Outcome::cancelled());
    }
}
