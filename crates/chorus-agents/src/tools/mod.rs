pub mod confirmation;
mod history_search;
pub mod internal;
mod manager;
mod time;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chorus_common::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use confirmation::{
    AllowListConfirmation, AutoApproveConfirmation, ToolConfirmationProvider,
    ToolExecutionRequest,
};
pub use history_search::SearchHistoryTool;
pub use internal::{InternalToolProvider, InternalToolServices};
pub use manager::{ToolManager, ToolStats};
pub use time::CurrentTimeTool;

/// Separator between a source prefix and the tool's local name.
pub const TOOL_NAME_DELIMITER: &str = "--";

/// Context passed to in-process tool executions.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: Option<String>,
}

/// Output from a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Trait for in-process tools the agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, context: &ToolContext, input: Value) -> Result<ToolOutput>;
}

/// Object schema describing a tool's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type", default = "object_type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

fn object_type() -> String {
    "object".to_string()
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            schema_type: object_type(),
            properties: Map::new(),
            required: Vec::new(),
        }
    }
}

impl ToolParameters {
    /// Lenient conversion from a JSON schema. Missing or malformed fields
    /// fall back to an empty object schema.
    pub fn from_schema(schema: &Value) -> Self {
        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            schema_type: object_type(),
            properties,
            required,
        }
    }

    pub fn to_schema(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Tools reported by one source, keyed by local name.
pub type ToolMap = BTreeMap<String, ToolDefinition>;

/// Merged view keyed by qualified name.
pub type ToolCatalog = BTreeMap<String, ToolDefinition>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolSourceKind {
    Mcp,
    Internal,
}

impl ToolSourceKind {
    pub const ALL: [ToolSourceKind; 2] = [ToolSourceKind::Mcp, ToolSourceKind::Internal];

    pub fn prefix(self) -> &'static str {
        match self {
            ToolSourceKind::Mcp => "mcp",
            ToolSourceKind::Internal => "internal",
        }
    }

    pub fn annotation(self) -> &'static str {
        match self {
            ToolSourceKind::Mcp => "(via MCP servers)",
            ToolSourceKind::Internal => "(internal tool)",
        }
    }

    pub fn qualify(self, local_name: &str) -> String {
        format!("{}{TOOL_NAME_DELIMITER}{local_name}", self.prefix())
    }

    /// Split a qualified name into its source and local name. The split is
    /// at the first delimiter so local names may themselves contain `--`.
    pub fn parse(qualified: &str) -> Option<(ToolSourceKind, &str)> {
        let (prefix, local) = qualified.split_once(TOOL_NAME_DELIMITER)?;
        if local.is_empty() {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.prefix() == prefix)
            .map(|kind| (kind, local))
    }
}

/// A collaborator that can enumerate and execute a set of named tools.
#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn get_all_tools(&self) -> Result<ToolMap>;

    async fn has_tool(&self, name: &str) -> Result<bool> {
        Ok(self.get_all_tools().await?.contains_key(name))
    }

    async fn execute_tool(
        &self,
        name: &str,
        args: Value,
        session_id: Option<&str>,
    ) -> Result<ToolOutput>;
}

/// Remote source used when no MCP servers are configured.
#[derive(Debug, Default)]
pub struct EmptyToolSource;

#[async_trait]
impl ToolSource for EmptyToolSource {
    async fn get_all_tools(&self) -> Result<ToolMap> {
        Ok(ToolMap::new())
    }

    async fn has_tool(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn execute_tool(
        &self,
        name: &str,
        _args: Value,
        _session_id: Option<&str>,
    ) -> Result<ToolOutput> {
        Err(chorus_common::Error::ToolNotFound(name.to_string()))
    }
}
