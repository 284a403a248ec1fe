use std::pin::Pin;

use async_trait::async_trait;
use chorus_common::{Error, Result};
use futures::Stream;
use serde::{Deserialize, Serialize};

mod registry;

pub use registry::ProviderRegistry;

use crate::tools::ToolDefinition;

/// Trait for LLM provider integrations. Vendor adapters live outside this
/// crate and register themselves with a [`ProviderRegistry`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g. "anthropic", "openai", "ollama").
    fn provider_id(&self) -> &str;

    /// Whether `model` can be served by this provider.
    fn supports_model(&self, _model: &str) -> bool {
        true
    }

    /// Context window for `model`, if the provider knows it.
    fn max_input_tokens(&self, _model: &str) -> Option<usize> {
        None
    }

    /// Send a completion request and return the response.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Stream a completion. Providers without streaming keep the default,
    /// and callers fall back to [`complete`](LlmProvider::complete).
    async fn stream_complete(&self, _request: &LlmRequest) -> Result<LlmStream> {
        Err(Error::Agent(format!(
            "provider '{}' does not support streaming",
            self.provider_id()
        )))
    }

    /// Check if the provider is available and configured.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessagePart,
}

impl ChatMessage {
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessagePart::Text(text.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePart {
    Text(String),
    Parts(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { url: String },
    #[serde(rename = "file")]
    File {
        data: String,
        mime_type: String,
        filename: Option<String>,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
}

impl LlmResponse {
    pub fn text(&self) -> String {
        extract_text(&self.content)
    }

    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }))
    }
}

/// Incremental events produced by [`LlmProvider::stream_complete`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    TextDelta(String),
    ToolUseStart { index: u32, id: String, name: String },
    InputJsonDelta(String),
    ContentBlockStop { index: u32 },
    MessageDelta {
        stop_reason: Option<String>,
        usage: Option<Usage>,
    },
    MessageStop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Tool description in the shape providers send to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl From<&ToolDefinition> for ToolSpec {
    fn from(definition: &ToolDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            input_schema: definition.parameters.to_schema(),
        }
    }
}

pub fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
