//! Tool servers attached to a run: connection, discovery, and dispatch.
//!
//! A [`McpToolbox`] lives for one invocation. It connects to every stdio
//! server in the resolved spec, lists their tools, and routes tool calls
//! by name. Servers that cannot be reached are skipped with a warning so
//! the model still runs with whatever tools remain.

pub mod protocol;
pub mod stdio;

use std::collections::HashMap;

use af_domain::spec::{ResolvedMcpServer, ResolvedTool};
use af_domain::template::McpServerType;
use serde_json::Value;

use self::protocol::ToolDef;
use self::stdio::StdioSession;

/// Text returned to the model for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpToolbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct McpToolbox {
    sessions: Vec<StdioSession>,
    /// Tool name -> index into `sessions`. First server to list a name wins.
    routes: HashMap<String, usize>,
    tools: Vec<(String, ToolDef)>,
}

impl McpToolbox {
    pub async fn connect(servers: &[ResolvedMcpServer]) -> Self {
        let mut toolbox = Self {
            sessions: Vec::new(),
            routes: HashMap::new(),
            tools: Vec::new(),
        };
        for server in servers {
            if server.server_type != McpServerType::Stdio {
                tracing::warn!(
                    server = %server.name,
                    server_type = ?server.server_type,
                    "only stdio tool servers are supported, skipping"
                );
                continue;
            }
            match Self::open(server).await {
                Ok((session, defs)) => toolbox.add(server, session, defs),
                Err(e) => {
                    tracing::warn!(server = %server.name, error = %e, "tool server unavailable");
                }
            }
        }
        toolbox
    }

    async fn open(server: &ResolvedMcpServer) -> af_domain::error::Result<(StdioSession, Vec<ToolDef>)> {
        let mut session = StdioSession::connect(server).await?;
        match session.list_tools().await {
            Ok(defs) => Ok((session, defs)),
            Err(e) => {
                session.shutdown().await;
                Err(e)
            }
        }
    }

    fn add(&mut self, server: &ResolvedMcpServer, session: StdioSession, defs: Vec<ToolDef>) {
        let index = self.sessions.len();
        let tool_count = defs.len();
        self.sessions.push(session);
        for def in defs {
            if self.routes.contains_key(&def.name) {
                tracing::warn!(server = %server.name, tool = %def.name, "duplicate tool name, keeping first");
                continue;
            }
            self.routes.insert(def.name.clone(), index);
            self.tools.push((server.mcp_id.clone(), def));
        }
        tracing::info!(server = %server.name, tool_count, "tool server connected");
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Discovered tools in the form the model adapters advertise.
    pub fn tool_defs(&self) -> Vec<ResolvedTool> {
        self.tools
            .iter()
            .map(|(mcp_id, def)| ResolvedTool {
                tool_id: format!("{mcp_id}/{}", def.name),
                name: def.name.clone(),
                description: (!def.description.is_empty()).then(|| def.description.clone()),
                tool_type: "mcp".into(),
                parameters_schema: def.input_schema.clone(),
            })
            .collect()
    }

    /// Run one tool. Transport failures come back as error output for the
    /// model rather than failing the run.
    pub async fn call(&mut self, name: &str, arguments: Value) -> ToolOutput {
        let Some(&index) = self.routes.get(name) else {
            return ToolOutput {
                content: format!("unknown tool: {name}"),
                is_error: true,
            };
        };
        let session = &mut self.sessions[index];
        let result = session.call_tool(name, arguments).await;
        match result {
            Ok(result) => ToolOutput {
                content: result.text(),
                is_error: result.is_error,
            },
            Err(e) => {
                tracing::warn!(server = %session.name(), tool = %name, error = %e, "tool call failed");
                ToolOutput {
                    content: e.to_string(),
                    is_error: true,
                }
            }
        }
    }

    pub async fn shutdown(self) {
        for session in self.sessions {
            session.shutdown().await;
        }
    }
}
