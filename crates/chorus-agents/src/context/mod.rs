//! Per-session conversation state: persisted history, token accounting and
//! provider-specific message formatting.

mod formatter;
mod manager;
mod message;
mod tokenizer;

pub use formatter::{ContentBlockFormatter, MessageFormatter, ToolRoleFormatter, formatter_for};
pub use manager::ContextManager;
pub use message::{FileData, ImageData, InternalMessage, MessageRole, ToolCall};
pub use tokenizer::{ApproximateTokenizer, Tokenizer, tokenizer_for};
