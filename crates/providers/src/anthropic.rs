//! Anthropic Messages API adapter.

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

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicAdapter {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(cfg)?.ok_or_else(|| {
            Error::Config(format!("provider '{}': anthropic requires api_key_env", cfg.id))
        })?;
        Ok(Self {
            id: cfg.id.clone(),
            base_url: required_base_url(cfg)?,
            api_key,
            default_model: cfg
                .default_model
                .clone()
                .unwrap_or_else(|| "claude-sonnet-4-20250514".into()),
            client: reqwest::Client::builder().build().map_err(from_reqwest)?,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    pub(crate) fn build_messages_body(&self, spec: &ResolvedSpec, input: &Value) -> Value {
        let model = if spec.model.model_id.is_empty() {
            self.default_model.as_str()
        } else {
            spec.model.model_id.as_str()
        };
        let mut messages = vec![serde_json::json!({"role": "user", "content": user_text(input)})];
        for round in tool_rounds(input) {
            push_round(&mut messages, &round);
        }
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": spec.model.max_tokens,
            "temperature": spec.model.temperature,
        });
        if !spec.system_prompt.is_empty() {
            body["system"] = Value::String(spec.system_prompt.clone());
        }
        if let Some(top_p) = spec.model.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if !spec.tools.is_empty() {
            body["tools"] = Value::Array(spec.tools.iter().map(tool_to_anthropic).collect());
        }
        body
    }

    async fn call(&self, spec: &ResolvedSpec, input: &Value) -> Outcome {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(spec, input);

        tracing::debug!(provider = %self.id, url = %url, "anthropic messages request");

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
            // 529 is Anthropic's "overloaded".
            let kind = if status.as_u16() == 529 {
                "rate_limited"
            } else {
                status_kind(status)
            };
            return Outcome::failure(kind, format!("HTTP {} - {}", status.as_u16(), text));
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(v) => parse_anthropic_response(&v),
            Err(e) => Outcome::from_error(&Error::Json(e)),
        }
    }
}

fn tool_to_anthropic(tool: &ResolvedTool) -> Value {
    let schema = if tool.parameters_schema.is_null() {
        serde_json::json!({"type": "object", "properties": {}})
    } else {
        tool.parameters_schema.clone()
    };
    serde_json::json!({
        "name": tool.name,
        "description": tool.description.clone().unwrap_or_default(),
        "input_schema": schema,
    })
}

/// `tool_use` blocks in an assistant turn, answered by `tool_result`
/// blocks in the following user turn.
fn push_round(messages: &mut Vec<Value>, round: &ToolRound) {
    let mut blocks = Vec::new();
    if !round.content.is_empty() {
        blocks.push(serde_json::json!({"type": "text", "text": round.content}));
    }
    for call in &round.calls {
        let input = if call.arguments.is_object() {
            call.arguments.clone()
        } else {
            serde_json::json!({})
        };
        blocks.push(serde_json::json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": input,
        }));
    }
    messages.push(serde_json::json!({"role": "assistant", "content": blocks}));

    let results: Vec<Value> = round
        .results
        .iter()
        .map(|r| {
            serde_json::json!({
                "type": "tool_result",
                "tool_use_id": r.call_id,
                "content": r.content,
                "is_error": r.is_error,
            })
        })
        .collect();
    messages.push(serde_json::json!({"role": "user", "content": results}));
}

pub(crate) fn parse_anthropic_response(body: &Value) -> Outcome {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for block in body
        .get("content")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
    {
        match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "text" => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text_parts.push(t);
                }
            }
            "tool_use" => tool_calls.push(serde_json::json!({
                "id": block.get("id").cloned().unwrap_or(Value::Null),
                "name": block.get("name").cloned().unwrap_or(Value::Null),
                "arguments": block.get("input").cloned().unwrap_or(Value::Null),
            })),
            _ => {}
        }
    }

    let finish_reason = body
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .map(|s| match s {
            "end_turn" => "stop".to_string(),
            "tool_use" => "tool_calls".to_string(),
            other => other.to_string(),
        });
    let usage = body
        .get("usage")
        .map(|u| UsageCounters {
            input_units: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_units: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
            cost: 0.0,
        })
        .unwrap_or_default();

    Outcome::Success {
        result: chat_result(text_parts.concat(), tool_calls, finish_reason),
        usage,
        model: body.get("model").and_then(|v| v.as_str()).map(String::from),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl Invoker for AnthropicAdapter {
    async fn invoke(&self, spec: &ResolvedSpec, input: &Value, ctx: &InvokeContext) -> Outcome {
        until_cancelled(ctx, self.call(spec, input)).await
    }

    fn adapter_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }
}
