//! Deterministic in-process adapter for development and tests.
//!
//! A `kind = "scripted"` provider from config echoes its input. Tests build
//! one directly and queue per-call [`Script`]s.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use af_domain::config::{ProviderConfig, ProviderKind};
use af_domain::spec::ResolvedSpec;
use af_domain::usage::UsageCounters;
use parking_lot::Mutex;
use serde_json::Value;

use crate::traits::{InvokeContext, Invoker, Outcome};
use crate::util::user_text;

#[derive(Debug, Clone)]
pub enum Script {
    /// Reply with the rendered system prompt and the user text. The input
    /// may carry `delay_ms` and `simulate_failure` (a failure kind).
    Echo,
    Succeed { result: Value, usage: UsageCounters },
    Fail { kind: String, detail: String },
    /// Never completes.
    Hang,
}

pub struct ScriptedAdapter {
    id: String,
    default: Script,
    queue: Mutex<VecDeque<Script>>,
    delay: Duration,
    progress: Vec<Value>,
    honor_cancel: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<(Value, Vec<String>)>>,
}

impl ScriptedAdapter {
    pub fn new(id: impl Into<String>, default: Script) -> Self {
        Self {
            id: id.into(),
            default,
            queue: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            progress: Vec::new(),
            honor_cancel: true,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(cfg: &ProviderConfig) -> Self {
        Self::new(cfg.id.clone(), Script::Echo)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Partial results reported before the outcome.
    pub fn with_progress(mut self, steps: Vec<Value>) -> Self {
        self.progress = steps;
        self
    }

    /// Keep running after the cancellation signal, like a misbehaving
    /// provider would.
    pub fn ignoring_cancel(mut self) -> Self {
        self.honor_cancel = false;
        self
    }

    /// Script used for the next call only.
    pub fn push(&self, script: Script) {
        self.queue.lock().push_back(script);
    }

    /// How many times `invoke` has been entered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every input received, in call order.
    pub fn inputs(&self) -> Vec<Value> {
        self.seen.lock().iter().map(|(input, _)| input.clone()).collect()
    }

    /// Tool names advertised to the most recent call.
    pub fn last_tools(&self) -> Vec<String> {
        self.seen
            .lock()
            .last()
            .map(|(_, tools)| tools.clone())
            .unwrap_or_default()
    }

    async fn wait(&self, ctx: &InvokeContext, delay: Duration) -> bool {
        if delay.is_zero() {
            return !(self.honor_cancel && ctx.is_cancelled());
        }
        if self.honor_cancel {
            tokio::select! {
                _ = ctx.cancel.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            }
        } else {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

fn echo(spec: &ResolvedSpec, input: &Value) -> Outcome {
    if let Some(kind) = input.get("simulate_failure").and_then(Value::as_str) {
        return Outcome::failure(kind, "simulated failure");
    }
    let text = user_text(input);
    let usage = UsageCounters {
        input_units: (spec.system_prompt.len() + text.len()) as u64,
        output_units: text.len() as u64,
        cost: 0.0,
    };
    Outcome::Success {
        result: serde_json::json!({
            "content": text,
            "system_prompt": spec.system_prompt,
            "variables": spec.variables,
        }),
        usage,
        model: Some(spec.model.model_id.clone()),
    }
}

#[async_trait::async_trait]
impl Invoker for ScriptedAdapter {
    async fn invoke(&self, spec: &ResolvedSpec, input: &Value, ctx: &InvokeContext) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push((
            input.clone(),
            spec.tools.iter().map(|t| t.name.clone()).collect(),
        ));
        let script = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        for step in &self.progress {
            ctx.report_progress(step.clone());
        }

        let mut delay = self.delay;
        if let Script::Echo = script {
            if let Some(ms) = input.get("delay_ms").and_then(Value::as_u64) {
                delay = Duration::from_millis(ms);
            }
        }
        if !self.wait(ctx, delay).await {
            return Outcome::cancelled();
        }

        match script {
            Script::Echo => echo(spec, input),
            Script::Succeed { result, usage } => Outcome::success(result, usage),
            Script::Fail { kind, detail } => Outcome::failure(kind, detail),
            Script::Hang => {
                if self.honor_cancel {
                    ctx.cancel.cancelled().await;
                    Outcome::cancelled()
                } else {
                    std::future::pending::<Outcome>().await
                }
            }
        }
    }

    fn adapter_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Scripted
    }
}
