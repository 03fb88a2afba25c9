//! Tool-process adapter: runs an external command once per invocation.
//!
//! Protocol (newline-delimited JSON):
//!
//! - stdin receives exactly one line `{"run_id", "spec", "input"}` and is
//!   then closed.
//! - stdout lines of the form `{"progress": <value>}` are forwarded as
//!   partial results.
//! - `{"status": "success", "result": <value>, "usage": {...}}` or
//!   `{"status": "failure", "kind": "...", "detail": "..."}` ends the call.
//!
//! Non-JSON stdout lines are skipped. A process that exits without an
//! outcome line fails with kind `tool_process_error`. Cancellation kills the
//! child.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use af_domain::config::{ProviderConfig, ProviderKind};
use af_domain::error::{Error, Result};
use af_domain::spec::ResolvedSpec;
use af_domain::usage::UsageCounters;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use crate::traits::{InvokeContext, Invoker, Outcome};

/// Give up on a process that writes this many non-JSON lines in a row.
const MAX_SKIP_LINES: usize = 1000;

pub struct ToolProcessAdapter {
    id: String,
    command: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum OutcomeLine {
    Success {
        #[serde(default)]
        result: Value,
        #[serde(default)]
        usage: UsageCounters,
        #[serde(default)]
        model: Option<String>,
    },
    Failure {
        kind: String,
        #[serde(default)]
        detail: String,
    },
}

impl ToolProcessAdapter {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let command = cfg
            .command
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Config(format!("provider '{}' requires command", cfg.id)))?;
        Ok(Self {
            id: cfg.id.clone(),
            command: PathBuf::from(command),
            args: cfg.args.clone(),
            env: cfg.env.clone(),
        })
    }

    fn spawn(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd.spawn()
    }

    async fn run(&self, child: &mut Child, request: &str, ctx: &InvokeContext) -> Outcome {
        let Some(mut stdin) = child.stdin.take() else {
            return Outcome::failure("tool_process_error", "failed to capture child stdin");
        };
        let Some(stdout) = child.stdout.take() else {
            return Outcome::failure("tool_process_error", "failed to capture child stdout");
        };

        if let Err(e) = async {
            stdin.write_all(request.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await
        {
            return Outcome::failure("tool_process_error", format!("write request: {e}"));
        }
        drop(stdin);

        let mut lines = BufReader::new(stdout).lines();
        let mut skipped = 0usize;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => return Outcome::failure("tool_process_error", format!("read stdout: {e}")),
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
                skipped += 1;
                if skipped >= MAX_SKIP_LINES {
                    return Outcome::failure(
                        "tool_process_error",
                        "process produced too many non-JSON lines on stdout",
                    );
                }
                tracing::debug!(provider = %self.id, line = %trimmed, "skipping non-JSON line");
                continue;
            };
            skipped = 0;

            if let Some(partial) = value.get("progress") {
                ctx.report_progress(partial.clone());
                continue;
            }
            match serde_json::from_value::<OutcomeLine>(value) {
                Ok(OutcomeLine::Success { result, usage, model }) => {
                    return Outcome::Success { result, usage, model }
                }
                Ok(OutcomeLine::Failure { kind, detail }) => return Outcome::failure(kind, detail),
                Err(e) => {
                    tracing::debug!(provider = %self.id, error = %e, "ignoring unrecognised line");
                }
            }
        }

        let status = child
            .wait()
            .await
            .map(|s| s.to_string())
            .unwrap_or_else(|e| e.to_string());
        Outcome::failure(
            "tool_process_error",
            format!("process exited without an outcome ({status})"),
        )
    }
}

#[async_trait::async_trait]
impl Invoker for ToolProcessAdapter {
    async fn invoke(&self, spec: &ResolvedSpec, input: &Value, ctx: &InvokeContext) -> Outcome {
        let request = serde_json::json!({
            "run_id": ctx.run_id,
            "spec": spec,
            "input": input,
        })
        .to_string();

        let mut child = match self.spawn() {
            Ok(c) => c,
            Err(e) => {
                return Outcome::failure(
                    "tool_process_error",
                    format!("spawn {}: {e}", self.command.display()),
                )
            }
        };
        tracing::debug!(provider = %self.id, run_id = %ctx.run_id, pid = ?child.id(), "spawned tool process");

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Outcome::cancelled(),
            outcome = self.run(&mut child, &request, ctx) => outcome,
        };
        if let Err(e) = child.start_kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::debug!(provider = %self.id, error = %e, "kill tool process");
            }
        }
        outcome
    }

    fn adapter_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::ToolProcess
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn adapter(script: &str) -> ToolProcessAdapter {
        ToolProcessAdapter::from_config(&ProviderConfig {
            id: "proc".into(),
            kind: ProviderKind::ToolProcess,
            base_url: None,
            api_key_env: None,
            default_model: None,
            command: Some("sh".into()),
            args: vec!["-c".into(), script.into()],
            env: Default::default(),
        })
        .unwrap()
    }

    fn spec() -> ResolvedSpec {
        serde_json::from_value(serde_json::json!({
            "tenant_id": "acme",
            "instance_id": "i1",
            "agent_id": "worker",
            "name": "Worker",
            "system_prompt": "",
            "variables": {},
            "model": {"provider": "proc", "model_id": "", "temperature": 0.0, "max_tokens": 0},
            "timeout_secs": 5
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn success_line_with_progress() {
        let a = adapter(
            r#"read line; echo 'starting'; echo '{"progress":{"pct":50}}'; echo '{"status":"success","result":{"ok":true},"usage":{"input_units":3,"output_units":4}}'"#,
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = InvokeContext::new(Uuid::new_v4(), CancellationToken::new()).with_progress(tx);
        match a.invoke(&spec(), &Value::Null, &ctx).await {
            Outcome::Success { result, usage, .. } => {
                assert_eq!(result["ok"], true);
                assert_eq!(usage.output_units, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap()["pct"], 50);
    }

    #[tokio::test]
    async fn failure_line_keeps_kind() {
        let a = adapter(r#"read line; echo '{"status":"failure","kind":"quota","detail":"over"}'"#);
        let ctx = InvokeContext::new(Uuid::new_v4(), CancellationToken::new());
        assert_eq!(
            a.invoke(&spec(), &Value::Null, &ctx).await,
            Outcome::failure("quota", "over")
        );
    }

    #[tokio::test]
    async fn exit_without_outcome_is_error() {
        let a = adapter("read line; exit 3");
        let ctx = InvokeContext::new(Uuid::new_v4(), CancellationToken::new());
        match a.invoke(&spec(), &Value::Null, &ctx).await {
            Outcome::Failure { kind, .. } => assert_eq!(kind, "tool_process_error"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_kills_long_running_process() {
        let a = adapter("read line; sleep 30");
        let ctx = InvokeContext::new(Uuid::new_v4(), CancellationToken::new());
        let token = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            token.cancel();
        });
        let started = std::time::Instant::now();
        assert_eq!(a.invoke(&spec(), &Value::Null, &ctx).await, Outcome::cancelled());
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn missing_command_is_config_error() {
        let cfg = ProviderConfig {
            id: "proc".into(),
            kind: ProviderKind::ToolProcess,
            base_url: None,
            api_key_env: None,
            default_model: None,
            command: None,
            args: Vec::new(),
            env: Default::default(),
        };
        assert!(matches!(
            ToolProcessAdapter::from_config(&cfg),
            Err(Error::Config(_))
        ));
    }
}
