use std::sync::{Arc, PoisonError, RwLock};

use chorus_common::Result;
use chorus_db::SessionHistory;
use tracing::debug;

use super::formatter::MessageFormatter;
use super::message::{FileData, ImageData, InternalMessage, MessageRole, ToolCall};
use super::tokenizer::Tokenizer;
use crate::providers::{ChatMessage, ToolSpec};
use crate::tools::ToolOutput;

struct ContextState {
    max_input_tokens: usize,
    tokenizer: Arc<dyn Tokenizer>,
    formatter: Arc<dyn MessageFormatter>,
}

/// Owns one session's history. The tokenizer, formatter and budget can be
/// swapped in place without touching what is stored.
pub struct ContextManager {
    history: SessionHistory,
    state: RwLock<ContextState>,
}

impl ContextManager {
    pub fn new(
        history: SessionHistory,
        max_input_tokens: usize,
        tokenizer: Arc<dyn Tokenizer>,
        formatter: Arc<dyn MessageFormatter>,
    ) -> Self {
        Self {
            history,
            state: RwLock::new(ContextState {
                max_input_tokens,
                tokenizer,
                formatter,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        self.history.session_id()
    }

    pub async fn get_history(&self) -> Result<Vec<InternalMessage>> {
        self.history.load_all().await
    }

    pub async fn add_message(&self, message: &InternalMessage) -> Result<()> {
        self.history.append(message).await
    }

    pub async fn add_user_message(
        &self,
        content: &str,
        image: Option<ImageData>,
        file: Option<FileData>,
    ) -> Result<()> {
        let message = InternalMessage::user(content)
            .with_image(image)
            .with_file(file);
        self.add_message(&message).await
    }

    pub async fn add_assistant_message(
        &self,
        content: &str,
        tool_calls: Vec<ToolCall>,
    ) -> Result<()> {
        let message = InternalMessage::assistant(content).with_tool_calls(tool_calls);
        self.add_message(&message).await
    }

    pub async fn add_tool_result(
        &self,
        tool_call_id: &str,
        name: &str,
        output: &ToolOutput,
    ) -> Result<()> {
        let message =
            InternalMessage::tool_result(tool_call_id, name, output.content.clone(), output.is_error);
        self.add_message(&message).await
    }

    pub async fn reset_conversation(&self) -> Result<()> {
        self.history.clear().await
    }

    /// Replace the budget, and the tokenizer/formatter when given.
    pub fn update_config(
        &self,
        max_input_tokens: usize,
        tokenizer: Option<Arc<dyn Tokenizer>>,
        formatter: Option<Arc<dyn MessageFormatter>>,
    ) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.max_input_tokens = max_input_tokens;
        if let Some(tokenizer) = tokenizer {
            state.tokenizer = tokenizer;
        }
        if let Some(formatter) = formatter {
            state.formatter = formatter;
        }
    }

    pub fn max_input_tokens(&self) -> usize {
        self.read_state().max_input_tokens
    }

    pub fn tokenizer_name(&self) -> String {
        self.read_state().tokenizer.name().to_string()
    }

    pub fn formatter_name(&self) -> &'static str {
        self.read_state().formatter.name()
    }

    pub fn count_tokens(&self, messages: &[InternalMessage]) -> usize {
        let tokenizer = Arc::clone(&self.read_state().tokenizer);
        messages.iter().map(|m| tokenizer.count_message(m)).sum()
    }

    /// History trimmed to the input budget and formatted for the current
    /// provider. The oldest messages go first; the latest is always kept.
    pub async fn get_formatted_messages(
        &self,
        system: Option<&str>,
        tools: &[ToolSpec],
    ) -> Result<Vec<ChatMessage>> {
        let mut messages = self.get_history().await?;
        let (max_input_tokens, tokenizer, formatter) = {
            let state = self.read_state();
            (
                state.max_input_tokens,
                Arc::clone(&state.tokenizer),
                Arc::clone(&state.formatter),
            )
        };

        let mut fixed = system.map(|s| tokenizer.count_tokens(s)).unwrap_or(0);
        for tool in tools {
            fixed += tokenizer.count_tokens(&tool.name)
                + tokenizer.count_tokens(&tool.description)
                + tokenizer.count_tokens(&tool.input_schema.to_string());
        }
        let budget = max_input_tokens.saturating_sub(fixed);

        let before = messages.len();
        trim_to_budget(&mut messages, tokenizer.as_ref(), budget);
        if messages.len() < before {
            debug!(
                "trimmed {} message(s) from session '{}' to fit {} tokens",
                before - messages.len(),
                self.session_id(),
                max_input_tokens
            );
        }

        Ok(formatter.format(&messages))
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ContextState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn trim_to_budget(messages: &mut Vec<InternalMessage>, tokenizer: &dyn Tokenizer, budget: usize) {
    let mut total: usize = messages.iter().map(|m| tokenizer.count_message(m)).sum();
    let mut cut = 0;
    while messages.len() - cut > 1 && total > budget {
        total -= tokenizer.count_message(&messages[cut]);
        cut += 1;
    }
    // A tool result whose call was trimmed away is meaningless to the model.
    while messages.len() - cut > 1 && messages[cut].role == MessageRole::Tool {
        cut += 1;
    }
    messages.drain(..cut);
}
