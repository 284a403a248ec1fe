//! In-process tools gated by an explicit allow-list.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chorus_common::{Error, Result};
use chorus_db::StorageBackend;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::history_search::SearchHistoryTool;
use super::time::CurrentTimeTool;
use super::{Tool, ToolContext, ToolDefinition, ToolMap, ToolOutput, ToolParameters, ToolSource};

/// Services internal tools may depend on. A tool whose dependency is absent
/// is skipped at initialization.
#[derive(Clone, Default)]
pub struct InternalToolServices {
    pub storage: Option<Arc<dyn StorageBackend>>,
}

impl InternalToolServices {
    pub fn with_storage(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage: Some(storage),
        }
    }
}

/// Names of every built-in tool, whether or not it is enabled.
pub const BUILTIN_TOOLS: [&str; 2] = ["current_time", "search_history"];

pub struct InternalToolProvider {
    services: InternalToolServices,
    enabled: Vec<String>,
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl InternalToolProvider {
    pub fn new(services: InternalToolServices, enabled: Vec<String>) -> Self {
        Self {
            services,
            enabled,
            tools: RwLock::new(BTreeMap::new()),
        }
    }

    /// Instantiate every enabled tool whose dependencies are available.
    /// Safe to call again; the tool set is rebuilt from scratch.
    pub async fn initialize(&self) {
        let mut tools: BTreeMap<String, Arc<dyn Tool>> = BTreeMap::new();
        for name in &self.enabled {
            if let Some(tool) = self.build(name) {
                tools.insert(tool.name().to_string(), tool);
            }
        }
        info!(
            "internal tools initialized: {} of {} requested",
            tools.len(),
            self.enabled.len()
        );
        *self.tools.write().await = tools;
    }

    fn build(&self, name: &str) -> Option<Arc<dyn Tool>> {
        match name {
            "current_time" => Some(Arc::new(CurrentTimeTool)),
            "search_history" => match &self.services.storage {
                Some(storage) => Some(Arc::new(SearchHistoryTool::new(Arc::clone(storage)))),
                None => {
                    warn!("internal tool 'search_history' needs storage, skipping");
                    None
                }
            },
            other => {
                warn!("unknown internal tool '{other}', skipping");
                None
            }
        }
    }
}

#[async_trait]
impl ToolSource for InternalToolProvider {
    async fn get_all_tools(&self) -> Result<ToolMap> {
        let tools = self.tools.read().await;
        Ok(tools
            .iter()
            .map(|(name, tool)| {
                let definition = ToolDefinition::new(
                    name.clone(),
                    tool.description(),
                    ToolParameters::from_schema(&tool.input_schema()),
                );
                (name.clone(), definition)
            })
            .collect())
    }

    async fn has_tool(&self, name: &str) -> Result<bool> {
        Ok(self.tools.read().await.contains_key(name))
    }

    async fn execute_tool(
        &self,
        name: &str,
        args: Value,
        session_id: Option<&str>,
    ) -> Result<ToolOutput> {
        let tool = self
            .tools
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;
        let context = ToolContext {
            session_id: session_id.map(str::to_string),
        };
        tool.execute(&context, args).await
    }
}

#[cfg(test)]
mod tests {
    use chorus_db::InMemoryBackend;
    use serde_json::json;

    use super::*;

    fn names(map: &ToolMap) -> Vec<&str> {
        map.keys().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn nothing_enabled_means_no_tools() {
        let services = InternalToolServices::with_storage(Arc::new(InMemoryBackend::new()));
        let provider = InternalToolProvider::new(services, Vec::new());
        provider.initialize().await;
        assert!(provider.get_all_tools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tools_missing_dependencies_are_skipped() {
        let provider = InternalToolProvider::new(
            InternalToolServices::default(),
            vec!["current_time".into(), "search_history".into(), "bogus".into()],
        );
        provider.initialize().await;
        let tools = provider.get_all_tools().await.unwrap();
        assert_eq!(names(&tools), vec!["current_time"]);
        assert!(!provider.has_tool("search_history").await.unwrap());
    }

    #[tokio::test]
    async fn all_builtins_with_storage() {
        let services = InternalToolServices::with_storage(Arc::new(InMemoryBackend::new()));
        let enabled = BUILTIN_TOOLS.iter().map(|s| s.to_string()).collect();
        let provider = InternalToolProvider::new(services, enabled);
        provider.initialize().await;
        let tools = provider.get_all_tools().await.unwrap();
        assert_eq!(names(&tools), vec!["current_time", "search_history"]);
        assert_eq!(tools["search_history"].parameters.required, vec!["query"]);
    }

    #[tokio::test]
    async fn execute_unknown_tool_fails() {
        let provider = InternalToolProvider::new(InternalToolServices::default(), Vec::new());
        provider.initialize().await;
        let err = provider
            .execute_tool("current_time", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(_)));
    }
}
