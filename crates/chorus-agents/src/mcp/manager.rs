use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chorus_common::{Error, Result};
use chorus_config::McpServerConfig;
use rmcp::ServiceExt;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::tools::{ToolDefinition, ToolMap, ToolOutput, ToolParameters, ToolSource};

/// Cached info about a tool discovered from an MCP server.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// A live connection to one MCP server.
struct McpConnection {
    service: RunningService<RoleClient, ()>,
    tools: Vec<McpToolInfo>,
    timeout: Duration,
}

/// Handle for calling one tool on the server that owns it.
#[derive(Clone)]
pub struct McpToolClient {
    pub server_name: String,
    peer: Peer<RoleClient>,
    timeout: Duration,
}

impl McpToolClient {
    pub async fn call(&self, tool_name: &str, args: Value) -> Result<ToolOutput> {
        let request = CallToolRequestParam {
            name: Cow::Owned(tool_name.to_string()),
            arguments: match args {
                Value::Object(map) => Some(map),
                Value::Null => None,
                other => {
                    return Err(Error::Mcp(format!(
                        "arguments for '{tool_name}' must be an object, got {other}"
                    )));
                }
            },
        };

        let result = tokio::time::timeout(self.timeout, self.peer.call_tool(request))
            .await
            .map_err(|_| {
                Error::Mcp(format!(
                    "tool '{tool_name}' on '{}' timed out after {}s",
                    self.server_name,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                Error::Mcp(format!(
                    "tool '{tool_name}' on '{}' failed: {e}",
                    self.server_name
                ))
            })?;

        let content = serde_json::to_value(&result.content)?;
        Ok(ToolOutput {
            content: content_text(&content),
            is_error: result.is_error.unwrap_or(false),
        })
    }
}

/// Join the text items of an MCP result; fall back to the raw JSON when the
/// server returned no text.
fn content_text(content: &Value) -> String {
    let texts: Vec<&str> = content
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if texts.is_empty() {
        content.to_string()
    } else {
        texts.join("\n")
    }
}

/// Manages MCP server connections and exposes their tools as one remote
/// tool source.
#[derive(Default)]
pub struct McpManager {
    connections: RwLock<BTreeMap<String, McpConnection>>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to an MCP server by spawning a child process.
    pub async fn connect(&self, name: &str, config: &McpServerConfig) -> Result<()> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (k, v) in &config.env {
            cmd.env(k, v);
        }

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| Error::Mcp(format!("failed to spawn MCP server '{name}': {e}")))?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let service = tokio::time::timeout(timeout, ().serve(transport))
            .await
            .map_err(|_| {
                Error::Mcp(format!(
                    "MCP server '{name}' handshake timed out after {}s",
                    config.timeout_secs
                ))
            })?
            .map_err(|e| Error::Mcp(format!("MCP server '{name}' handshake failed: {e}")))?;

        let mcp_tools = service
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| Error::Mcp(format!("failed to list tools from '{name}': {e}")))?;

        let tools: Vec<McpToolInfo> = mcp_tools
            .into_iter()
            .map(|t| McpToolInfo {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()),
                input_schema: Value::Object((*t.input_schema).clone()),
            })
            .collect();

        info!(
            "MCP server '{name}' connected: {} tool(s) discovered",
            tools.len()
        );
        for tool in &tools {
            debug!("  -> {name}.{}", tool.name);
        }

        let previous = self.connections.write().await.insert(
            name.to_string(),
            McpConnection {
                service,
                tools,
                timeout,
            },
        );
        if let Some(previous) = previous {
            if let Err(e) = previous.service.cancel().await {
                warn!("error cancelling replaced MCP server '{name}': {e}");
            }
        }
        Ok(())
    }

    /// Connect every configured server. Failures are logged and skipped.
    /// Returns the number of servers connected.
    pub async fn connect_all(&self, servers: &BTreeMap<String, McpServerConfig>) -> usize {
        let mut connected = 0;
        for (name, config) in servers {
            match self.connect(name, config).await {
                Ok(()) => connected += 1,
                Err(e) => warn!("skipping MCP server '{name}': {e}"),
            }
        }
        connected
    }

    /// Disconnect a specific MCP server.
    pub async fn disconnect(&self, name: &str) {
        let removed = self.connections.write().await.remove(name);
        if let Some(conn) = removed {
            info!("disconnecting MCP server '{name}'");
            if let Err(e) = conn.service.cancel().await {
                warn!("error cancelling MCP server '{name}': {e}");
            }
        }
    }

    /// Disconnect all MCP servers.
    pub async fn disconnect_all(&self) {
        let conns = std::mem::take(&mut *self.connections.write().await);
        for (name, conn) in conns {
            info!("disconnecting MCP server '{name}'");
            if let Err(e) = conn.service.cancel().await {
                warn!("error cancelling MCP server '{name}': {e}");
            }
        }
    }

    /// Connected servers with their tool counts.
    pub async fn list_servers(&self) -> Vec<(String, usize)> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(name, conn)| (name.clone(), conn.tools.len()))
            .collect()
    }

    /// Client for the server that owns `tool_name`. Servers are searched in
    /// name order, matching the resolution used by [`ToolSource::get_all_tools`].
    pub async fn get_tool_client(&self, tool_name: &str) -> Option<McpToolClient> {
        let conns = self.connections.read().await;
        conns.iter().find_map(|(server_name, conn)| {
            conn.tools
                .iter()
                .any(|t| t.name == tool_name)
                .then(|| McpToolClient {
                    server_name: server_name.clone(),
                    peer: conn.service.peer().clone(),
                    timeout: conn.timeout,
                })
        })
    }
}

#[async_trait]
impl ToolSource for McpManager {
    /// When two servers expose the same tool name, the first server in name
    /// order wins and the other is logged.
    async fn get_all_tools(&self) -> Result<ToolMap> {
        let conns = self.connections.read().await;
        let mut tools = ToolMap::new();
        let mut owners: HashMap<String, &str> = HashMap::new();
        for (server_name, conn) in conns.iter() {
            for tool in &conn.tools {
                if let Some(owner) = owners.get(&tool.name) {
                    warn!(
                        "MCP tool '{}' from '{server_name}' is shadowed by '{owner}'",
                        tool.name
                    );
                    continue;
                }
                owners.insert(tool.name.clone(), server_name);
                tools.insert(
                    tool.name.clone(),
                    ToolDefinition::new(
                        tool.name.clone(),
                        tool.description.clone().unwrap_or_default(),
                        ToolParameters::from_schema(&tool.input_schema),
                    ),
                );
            }
        }
        Ok(tools)
    }

    async fn has_tool(&self, name: &str) -> Result<bool> {
        Ok(self.get_tool_client(name).await.is_some())
    }

    async fn execute_tool(
        &self,
        name: &str,
        args: Value,
        _session_id: Option<&str>,
    ) -> Result<ToolOutput> {
        let client = self
            .get_tool_client(name)
            .await
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;
        client.call(name, args).await
    }
}
