use af_domain::config::ProviderKind;
use af_domain::error::Error;
use af_domain::spec::ResolvedSpec;
use af_domain::usage::UsageCounters;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregate result of one invocation. Adapters never return `Err`; every
/// failure mode is a `Failure` with a stable `kind`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        result: Value,
        usage: UsageCounters,
        /// Model that actually answered, when the provider reports it.
        model: Option<String>,
    },
    Failure {
        kind: String,
        detail: String,
    },
}

impl Outcome {
    pub fn success(result: Value, usage: UsageCounters) -> Self {
        Self::Success {
            result,
            usage,
            model: None,
        }
    }

    pub fn failure(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Failure {
            kind: kind.into(),
            detail: detail.into(),
        }
    }

    /// Returned by adapters that noticed the cancellation signal.
    pub fn cancelled() -> Self {
        Self::failure("cancelled", "invocation cancelled")
    }

    pub fn from_error(e: &Error) -> Self {
        let kind = match e {
            Error::Adapter { kind, .. } => return Self::failure(kind.clone(), e.to_string()),
            Error::Timeout(_) => "provider_timeout",
            Error::Http(_) => "http_error",
            Error::Json(_) => "invalid_response",
            Error::Config(_) => "adapter_misconfigured",
            Error::Io(_) => "io_error",
            _ => "adapter_error",
        };
        Self::failure(kind, e.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the supervisor hands an adapter alongside the spec: the run
/// identity, a cancellation token, and an optional progress sink.
#[derive(Debug, Clone)]
pub struct InvokeContext {
    pub run_id: Uuid,
    pub cancel: CancellationToken,
    progress: Option<mpsc::UnboundedSender<Value>>,
}

impl InvokeContext {
    pub fn new(run_id: Uuid, cancel: CancellationToken) -> Self {
        Self {
            run_id,
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<Value>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Report a partial result. Dropped silently if nobody listens.
    pub fn report_progress(&self, partial: Value) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(partial);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core adapter trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every invocation adapter must implement.
///
/// One implementation per provider kind; the supervisor picks the adapter
/// by `spec.model.provider` and otherwise treats it as a black box. An
/// adapter should return promptly once `ctx.cancel` fires, but the caller
/// does not rely on it.
#[async_trait::async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, spec: &ResolvedSpec, input: &Value, ctx: &InvokeContext) -> Outcome;

    /// The configured adapter id (`[[providers]] id`).
    fn adapter_id(&self) -> &str;

    fn kind(&self) -> ProviderKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping_keeps_adapter_kind() {
        let e = Error::Adapter {
            kind: "rate_limited".into(),
            detail: "slow down".into(),
        };
        match Outcome::from_error(&e) {
            Outcome::Failure { kind, .. } => assert_eq!(kind, "rate_limited"),
            other => panic!("unexpected {other:?}"),
        }
        match Outcome::from_error(&Error::Timeout("30s".into())) {
            Outcome::Failure { kind, .. } => assert_eq!(kind, "provider_timeout"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn progress_is_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = InvokeContext::new(Uuid::nil(), CancellationToken::new()).with_progress(tx);
        ctx.report_progress(serde_json::json!({"step": 1}));
        assert_eq!(rx.recv().await.unwrap()["step"], 1);
    }

    #[test]
    fn progress_without_sink_is_noop() {
        let ctx = InvokeContext::new(Uuid::nil(), CancellationToken::new());
        ctx.report_progress(Value::Null);
        assert!(!ctx.is_cancelled());
    }
}
