use std::sync::Arc;

use chorus_config::RoutingMode;

use super::message::{InternalMessage, MessageRole};
use crate::providers::{ChatMessage, ChatRole, ContentBlock, MessagePart};

/// Converts persisted history into provider request messages.
pub trait MessageFormatter: Send + Sync {
    fn name(&self) -> &'static str;

    fn format(&self, messages: &[InternalMessage]) -> Vec<ChatMessage>;
}

/// Tool results travel as `tool_result` blocks inside user turns, and
/// consecutive results are merged into one turn.
#[derive(Debug, Default)]
pub struct ContentBlockFormatter;

/// Tool results travel as separate messages with the `tool` role.
#[derive(Debug, Default)]
pub struct ToolRoleFormatter;

impl MessageFormatter for ContentBlockFormatter {
    fn name(&self) -> &'static str {
        "content-block"
    }

    fn format(&self, messages: &[InternalMessage]) -> Vec<ChatMessage> {
        let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len());
        for message in messages {
            if message.role != MessageRole::Tool {
                out.push(format_common(message));
                continue;
            }

            let block = tool_result_block(message);
            match out.last_mut() {
                Some(ChatMessage {
                    role: ChatRole::User,
                    content: MessagePart::Parts(parts),
                }) if parts
                    .iter()
                    .all(|p| matches!(p, ContentBlock::ToolResult { .. })) =>
                {
                    parts.push(block);
                }
                _ => out.push(ChatMessage {
                    role: ChatRole::User,
                    content: MessagePart::Parts(vec![block]),
                }),
            }
        }
        out
    }
}

impl MessageFormatter for ToolRoleFormatter {
    fn name(&self) -> &'static str {
        "tool-role"
    }

    fn format(&self, messages: &[InternalMessage]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|message| match message.role {
                MessageRole::Tool => ChatMessage {
                    role: ChatRole::Tool,
                    content: MessagePart::Parts(vec![tool_result_block(message)]),
                },
                _ => format_common(message),
            })
            .collect()
    }
}

fn format_common(message: &InternalMessage) -> ChatMessage {
    let role = match message.role {
        MessageRole::System => ChatRole::System,
        MessageRole::User => ChatRole::User,
        MessageRole::Assistant => ChatRole::Assistant,
        MessageRole::Tool => ChatRole::Tool,
    };

    let has_attachments = message.image.is_some() || message.file.is_some();
    if !has_attachments && message.tool_calls.is_empty() {
        return ChatMessage::text(role, message.content.clone());
    }

    let mut parts = Vec::new();
    if !message.content.is_empty() {
        parts.push(ContentBlock::Text {
            text: message.content.clone(),
        });
    }
    if let Some(image) = &message.image {
        parts.push(ContentBlock::Image {
            url: image.to_url(),
        });
    }
    if let Some(file) = &message.file {
        parts.push(ContentBlock::File {
            data: file.data.clone(),
            mime_type: file.mime_type.clone(),
            filename: file.filename.clone(),
        });
    }
    for call in &message.tool_calls {
        parts.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        });
    }
    ChatMessage {
        role,
        content: MessagePart::Parts(parts),
    }
}

fn tool_result_block(message: &InternalMessage) -> ContentBlock {
    ContentBlock::ToolResult {
        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
        content: message.content.clone(),
        is_error: message.is_error,
    }
}

/// Native routing to Anthropic uses content blocks; every other
/// combination uses the tool role.
pub fn formatter_for(provider: &str, routing: RoutingMode) -> Arc<dyn MessageFormatter> {
    match (provider, routing) {
        ("anthropic", RoutingMode::Native) => Arc::new(ContentBlockFormatter),
        _ => Arc::new(ToolRoleFormatter),
    }
}
