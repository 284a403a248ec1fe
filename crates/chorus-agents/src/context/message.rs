use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        f.write_str(role)
    }
}

/// Image attached to a user turn. `data` is either base64 or a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub data: String,
    pub mime_type: String,
}

impl ImageData {
    pub fn to_url(&self) -> String {
        if self.data.starts_with("http://")
            || self.data.starts_with("https://")
            || self.data.starts_with("data:")
        {
            self.data.clone()
        } else {
            format!("data:{};base64,{}", self.mime_type, self.data)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub data: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// A tool invocation requested by the model. `name` is the qualified name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Provider-neutral message as persisted in session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalMessage {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl InternalMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image: None,
            file: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            is_error,
            ..Self::new(MessageRole::Tool, content)
        }
    }

    pub fn with_image(mut self, image: Option<ImageData>) -> Self {
        self.image = image;
        self
    }

    pub fn with_file(mut self, file: Option<FileData>) -> Self {
        self.file = file;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serialized_form_is_compact_camel_case() {
        let msg = InternalMessage::tool_result("call-1", "mcp--read", "done", false);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["toolCallId"], "call-1");
        assert!(value.get("isError").is_none());
        assert!(value.get("toolCalls").is_none());
    }

    #[test]
    fn image_data_becomes_data_url() {
        let image = ImageData {
            data: "aGVsbG8=".into(),
            mime_type: "image/png".into(),
        };
        assert_eq!(image.to_url(), "data:image/png;base64,aGVsbG8=");

        let remote = ImageData {
            data: "https://example.com/cat.png".into(),
            mime_type: "image/png".into(),
        };
        assert_eq!(remote.to_url(), "https://example.com/cat.png");
    }

    #[test]
    fn missing_optional_fields_deserialize() {
        let msg: InternalMessage = serde_json::from_value(json!({
            "role": "user",
            "content": "hi",
            "timestamp": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(msg.role, MessageRole::User);
        assert!(!msg.is_error);
        assert!(msg.tool_calls.is_empty());
    }
}
