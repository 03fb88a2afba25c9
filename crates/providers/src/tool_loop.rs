//! Tool-calling loop around a model adapter.
//!
//! When the resolved spec attaches tool servers, [`ToolLoopAdapter`]
//! connects to them, advertises their tools to the model, executes the
//! `tool_calls` the model returns, and re-invokes the model with the
//! results until it answers without calling a tool or the turn limit is
//! reached. Without tool servers the inner adapter is called unchanged.
//!
//! Tool calls travel in one provider-neutral shape:
//! `{"id": .., "name": .., "arguments": {..}}` in the model result, and
//! `{"message": .., "tool_rounds": [ToolRound, ..]}` as the next input.

use std::sync::Arc;

use af_domain::config::ProviderKind;
use af_domain::spec::ResolvedSpec;
use af_domain::usage::UsageCounters;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::McpToolbox;
use crate::traits::{InvokeContext, Invoker, Outcome};
use crate::util::user_text;

/// Model turns allowed per invocation unless `custom_settings.max_tool_turns`
/// says otherwise.
pub const DEFAULT_MAX_TOOL_TURNS: u32 = 8;

// ── neutral tool-call shapes ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// One model turn that asked for tools, plus what the tools answered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolRound {
    #[serde(default)]
    pub content: String,
    pub calls: Vec<ToolCall>,
    pub results: Vec<ToolResult>,
}

/// Rounds carried by a tool-loop input. Anything malformed reads as none.
pub(crate) fn tool_rounds(input: &Value) -> Vec<ToolRound> {
    input
        .get("tool_rounds")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Calls requested by a model result, skipping entries without a name.
pub fn tool_calls(result: &Value) -> Vec<ToolCall> {
    let Some(calls) = result.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };
    calls
        .iter()
        .filter_map(|c| serde_json::from_value::<ToolCall>(c.clone()).ok())
        .filter(|c| !c.name.is_empty())
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolLoopAdapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolLoopAdapter {
    inner: Arc<dyn Invoker>,
    max_turns: u32,
}

impl ToolLoopAdapter {
    pub fn new(inner: Arc<dyn Invoker>) -> Self {
        Self {
            inner,
            max_turns: DEFAULT_MAX_TOOL_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    fn turn_limit(&self, spec: &ResolvedSpec) -> u32 {
        spec.custom_settings
            .get("max_tool_turns")
            .and_then(Value::as_u64)
            .map(|n| n.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(self.max_turns)
    }

    async fn run_loop(
        &self,
        toolbox: &mut McpToolbox,
        spec: &ResolvedSpec,
        input: &Value,
        ctx: &InvokeContext,
    ) -> Outcome {
        let mut spec = spec.clone();
        spec.tools.extend(toolbox.tool_defs());

        let message = user_text(input);
        let mut rounds: Vec<ToolRound> = Vec::new();
        let mut usage = UsageCounters::default();
        let limit = self.turn_limit(&spec);

        for turn in 1..=limit {
            let turn_input = if rounds.is_empty() {
                input.clone()
            } else {
                serde_json::json!({ "message": message, "tool_rounds": rounds })
            };

            let (result, turn_usage, model) = match self.inner.invoke(&spec, &turn_input, ctx).await {
                Outcome::Success { result, usage, model } => (result, usage, model),
                failure => return failure,
            };
            usage.add(&turn_usage);

            let calls = tool_calls(&result);
            // Calls this loop cannot serve are handed back to the caller.
            if calls.is_empty() || !calls.iter().all(|c| toolbox.has_tool(&c.name)) {
                return Outcome::Success { result, usage, model };
            }

            ctx.report_progress(serde_json::json!({
                "tool_turn": turn,
                "tool_calls": calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            }));

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                let out = tokio::select! {
                    _ = ctx.cancel.cancelled() => return Outcome::cancelled(),
                    out = toolbox.call(&call.name, call.arguments.clone()) => out,
                };
                tracing::debug!(run_id = %ctx.run_id, tool = %call.name, is_error = out.is_error, "tool call finished");
                results.push(ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    content: out.content,
                    is_error: out.is_error,
                });
            }

            rounds.push(ToolRound {
                content: result
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                calls,
                results,
            });
        }

        Outcome::failure(
            "tool_loop_limit",
            format!("model still calling tools after {limit} turns"),
        )
    }
}

#[async_trait::async_trait]
impl Invoker for ToolLoopAdapter {
    async fn invoke(&self, spec: &ResolvedSpec, input: &Value, ctx: &InvokeContext) -> Outcome {
        if spec.mcp_servers.is_empty() {
            return self.inner.invoke(spec, input, ctx).await;
        }

        let mut toolbox = tokio::select! {
            _ = ctx.cancel.cancelled() => return Outcome::cancelled(),
            toolbox = McpToolbox::connect(&spec.mcp_servers) => toolbox,
        };
        if toolbox.is_empty() {
            tracing::warn!(run_id = %ctx.run_id, "no tools available from attached servers");
        }

        let outcome = self.run_loop(&mut toolbox, spec, input, ctx).await;
        toolbox.shutdown().await;
        outcome
    }

    fn adapter_id(&self) -> &str {
        self.inner.adapter_id()
    }

    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }
}
