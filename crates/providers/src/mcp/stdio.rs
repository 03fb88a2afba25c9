//! Stdio session with one tool server: a child process speaking
//! newline-delimited JSON-RPC on stdin/stdout.

use std::process::Stdio;
use std::time::Duration;

use af_domain::error::{Error, Result};
use af_domain::spec::ResolvedMcpServer;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::protocol::{
    initialize_params, CallResult, Notification, Request, Response, ToolDef, ToolsList,
};

/// Non-JSON stdout lines tolerated before the server is considered broken.
const MAX_SKIP_LINES: usize = 1000;

/// One connected server. Requests are strictly sequential, so the session
/// is owned by a single tool loop and needs no internal locking.
pub struct StdioSession {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    timeout: Duration,
}

impl StdioSession {
    /// Spawn the server process and complete the initialize handshake.
    pub async fn connect(server: &ResolvedMcpServer) -> Result<Self> {
        let mut cmd = Command::new(&server.command);
        cmd.args(&server.args)
            .envs(&server.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| broken_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| broken_pipe("stdout"))?;

        let mut session = Self {
            name: server.name.clone(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
            timeout: Duration::from_secs(server.timeout_secs.max(1)),
        };
        session.request("initialize", Some(initialize_params())).await?;
        session.notify("notifications/initialized").await?;
        tracing::debug!(server = %session.name, "tool server initialized");
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn list_tools(&mut self) -> Result<Vec<ToolDef>> {
        let result = self.request("tools/list", None).await?;
        let list: ToolsList = serde_json::from_value(result)?;
        Ok(list.tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallResult> {
        let arguments = if arguments.is_null() {
            Value::Object(Default::default())
        } else {
            arguments
        };
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let result = self.request("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Close stdin and give the process a moment to exit before killing it.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.stdin.shutdown().await {
            tracing::debug!(server = %self.name, error = %e, "closing tool server stdin");
        }
        let exited = tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await;
        match exited {
            Ok(Ok(status)) => tracing::debug!(server = %self.name, ?status, "tool server exited"),
            Ok(Err(e)) => tracing::warn!(server = %self.name, error = %e, "waiting for tool server"),
            Err(_) => {
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(server = %self.name, error = %e, "failed to kill tool server");
                }
            }
        }
    }

    // ── wire ────────────────────────────────────────────────────────

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        self.write(&serde_json::to_string(&Request::new(id, method, params))?)
            .await?;

        let timeout = self.timeout;
        let server = self.name.clone();
        let response = tokio::time::timeout(timeout, async {
            loop {
                let line = self.read_line().await?;
                match serde_json::from_str::<Response>(&line) {
                    Ok(resp) if resp.id == id => return Ok::<Response, Error>(resp),
                    // Notifications and stale replies.
                    _ => tracing::debug!(server = %self.name, line = %line, "skipping message"),
                }
            }
        })
        .await
        .map_err(|_| Error::Timeout(format!("tool server {server} did not answer {method}")))??;

        response.into_result().map_err(|e| Error::Adapter {
            kind: "mcp_error".into(),
            detail: format!("{server}: {e}"),
        })
    }

    async fn notify(&mut self, method: &str) -> Result<()> {
        self.write(&serde_json::to_string(&Notification::new(method))?)
            .await
    }

    async fn write(&mut self, line: &str) -> Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            if self.stdout.read_line(&mut line).await? == 0 {
                return Err(Error::Adapter {
                    kind: "mcp_exited".into(),
                    detail: format!("tool server {} closed its output", self.name),
                });
            }
            let trimmed = line.trim();
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_string());
            }
            if !trimmed.is_empty() {
                skipped += 1;
                if skipped >= MAX_SKIP_LINES {
                    return Err(Error::Adapter {
                        kind: "mcp_error".into(),
                        detail: format!("tool server {} writes non-JSON output", self.name),
                    });
                }
            }
        }
    }
}

fn broken_pipe(stream: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("failed to capture child {stream}"),
    ))
}
