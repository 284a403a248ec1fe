use std::collections::BTreeSet;

use async_trait::async_trait;
use chorus_common::Result;
use serde_json::Value;
use tracing::debug;

/// A pending tool call presented for approval.
#[derive(Debug, Clone)]
pub struct ToolExecutionRequest {
    /// Qualified name, e.g. `mcp--read_file`.
    pub tool_name: String,
    pub args: Value,
    pub session_id: Option<String>,
}

/// Authorizes tool executions before they reach a source.
#[async_trait]
pub trait ToolConfirmationProvider: Send + Sync {
    /// `Ok(false)` denies the call.
    async fn request_confirmation(&self, request: &ToolExecutionRequest) -> Result<bool>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApproveConfirmation;

#[async_trait]
impl ToolConfirmationProvider for AutoApproveConfirmation {
    async fn request_confirmation(&self, _request: &ToolExecutionRequest) -> Result<bool> {
        Ok(true)
    }
}

/// Approves only the listed qualified tool names.
#[derive(Debug, Default, Clone)]
pub struct AllowListConfirmation {
    allowed: BTreeSet<String>,
}

impl AllowListConfirmation {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ToolConfirmationProvider for AllowListConfirmation {
    async fn request_confirmation(&self, request: &ToolExecutionRequest) -> Result<bool> {
        let approved = self.allowed.contains(&request.tool_name);
        if !approved {
            debug!("tool '{}' is not on the allow list", request.tool_name);
        }
        Ok(approved)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(name: &str) -> ToolExecutionRequest {
        ToolExecutionRequest {
            tool_name: name.to_string(),
            args: json!({}),
            session_id: None,
        }
    }

    #[tokio::test]
    async fn auto_approve_accepts_everything() {
        assert!(
            AutoApproveConfirmation
                .request_confirmation(&request("mcp--anything"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn allow_list_matches_qualified_names() {
        let confirm = AllowListConfirmation::new(["internal--current_time"]);
        assert!(
            confirm
                .request_confirmation(&request("internal--current_time"))
                .await
                .unwrap()
        );
        assert!(
            !confirm
                .request_confirmation(&request("current_time"))
                .await
                .unwrap()
        );
    }
}
