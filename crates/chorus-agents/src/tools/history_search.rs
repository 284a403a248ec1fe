use std::sync::Arc;

use async_trait::async_trait;
use chorus_common::{Error, Result};
use chorus_db::{SessionHistory, StorageBackend};
use serde_json::json;

use crate::context::InternalMessage;
use crate::tools::{Tool, ToolContext, ToolOutput};

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 50;
const SNIPPET_CHARS: usize = 200;

/// Case-insensitive search over the calling session's persisted history.
pub struct SearchHistoryTool {
    storage: Arc<dyn StorageBackend>,
}

impl SearchHistoryTool {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for SearchHistoryTool {
    fn name(&self) -> &'static str {
        "search_history"
    }

    fn description(&self) -> &'static str {
        "Search earlier messages of the current conversation for a phrase. \
         Returns the most recent matches first."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to look for (case-insensitive)."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of matches to return (default 5, max 50)."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let session_id = context
            .session_id
            .as_deref()
            .ok_or_else(|| Error::Tool("search_history needs a session".to_string()))?;
        let query = args["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| Error::Tool("missing or invalid 'query' argument".to_string()))?;
        let limit = args["limit"]
            .as_u64()
            .map(|n| (n as usize).clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);

        let history = SessionHistory::new(Arc::clone(&self.storage), session_id);
        let messages: Vec<InternalMessage> = history.load_all().await?;

        let needle = query.to_lowercase();
        let hits: Vec<String> = messages
            .iter()
            .rev()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .take(limit)
            .map(|m| format!("[{}] {}", m.role, snippet(&m.content)))
            .collect();

        if hits.is_empty() {
            return Ok(ToolOutput::success(format!("No messages matching '{query}'.")));
        }
        Ok(ToolOutput::success(hits.join("\n")))
    }
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(SNIPPET_CHARS).collect();
    cut.push_str("...");
    cut
}
