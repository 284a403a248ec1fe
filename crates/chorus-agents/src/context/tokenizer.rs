use std::sync::Arc;

use super::message::InternalMessage;

/// Fixed cost charged for an attached image or file.
const ATTACHMENT_TOKENS: usize = 256;
/// Role and framing overhead per message.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &str;

    fn count_tokens(&self, text: &str) -> usize;

    fn count_message(&self, message: &InternalMessage) -> usize {
        let mut tokens = MESSAGE_OVERHEAD_TOKENS + self.count_tokens(&message.content);
        for call in &message.tool_calls {
            tokens += self.count_tokens(&call.name) + self.count_tokens(&call.arguments.to_string());
        }
        if message.image.is_some() {
            tokens += ATTACHMENT_TOKENS;
        }
        if message.file.is_some() {
            tokens += ATTACHMENT_TOKENS;
        }
        tokens
    }
}

/// Character-ratio estimate. Good enough for budget trimming.
#[derive(Debug, Clone)]
pub struct ApproximateTokenizer {
    name: String,
    chars_per_token: f64,
}

impl ApproximateTokenizer {
    pub fn new(name: impl Into<String>, chars_per_token: f64) -> Self {
        Self {
            name: name.into(),
            chars_per_token: chars_per_token.max(1.0),
        }
    }
}

impl Tokenizer for ApproximateTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.chars().count() as f64 / self.chars_per_token).ceil() as usize
    }
}

pub fn tokenizer_for(provider: &str) -> Arc<dyn Tokenizer> {
    match provider {
        "anthropic" => Arc::new(ApproximateTokenizer::new("anthropic-approx", 3.5)),
        other => Arc::new(ApproximateTokenizer::new(format!("{other}-approx"), 4.0)),
    }
}
