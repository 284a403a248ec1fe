//! Top-level wiring: config to storage, tools and sessions.

use std::sync::Arc;

use chorus_common::{Error, Result};
use chorus_config::{AppConfig, LlmConfigUpdate, StorageConfig};
use chorus_db::{InMemoryBackend, SqliteBackend, StorageBackend};
use tracing::info;

use crate::context::{FileData, ImageData};
use crate::events::EventBus;
use crate::llm::{LlmServiceFactory, ProviderLlmFactory};
use crate::providers::ProviderRegistry;
use crate::session::{SessionManager, SessionServices, SwitchLlmResult};
use crate::tools::{AutoApproveConfirmation, InternalToolServices, ToolManager, ToolSource};

pub struct AgentRuntime {
    config: AppConfig,
    providers: Arc<ProviderRegistry>,
    storage: Arc<dyn StorageBackend>,
    tools: Arc<ToolManager>,
    events: Arc<EventBus>,
    sessions: Arc<SessionManager>,
    #[cfg(feature = "mcp")]
    mcp: Option<Arc<crate::mcp::McpManager>>,
}

impl AgentRuntime {
    /// Open the configured storage, connect MCP servers (with the `mcp`
    /// feature) and start the session manager.
    pub async fn start(config: AppConfig, providers: Arc<ProviderRegistry>) -> Result<Self> {
        config.validate()?;
        let storage = open_storage(&config.storage)?;

        #[cfg(feature = "mcp")]
        {
            let mcp = Arc::new(crate::mcp::McpManager::new());
            if !config.mcp.is_empty() {
                let connected = mcp.connect_all(&config.mcp).await;
                info!("{connected} of {} MCP server(s) connected", config.mcp.len());
            }
            let remote: Arc<dyn ToolSource> = mcp.clone();
            let mut runtime = Self::start_with(config, providers, storage, remote).await?;
            runtime.mcp = Some(mcp);
            Ok(runtime)
        }

        #[cfg(not(feature = "mcp"))]
        {
            if !config.mcp.is_empty() {
                tracing::warn!(
                    "{} MCP server(s) configured but the `mcp` feature is disabled",
                    config.mcp.len()
                );
            }
            let remote: Arc<dyn ToolSource> = Arc::new(crate::tools::EmptyToolSource);
            Self::start_with(config, providers, storage, remote).await
        }
    }

    /// Start over explicit storage and remote tool source.
    pub async fn start_with(
        config: AppConfig,
        providers: Arc<ProviderRegistry>,
        storage: Arc<dyn StorageBackend>,
        remote: Arc<dyn ToolSource>,
    ) -> Result<Self> {
        let tools = Arc::new(ToolManager::new(remote, Arc::new(AutoApproveConfirmation)));
        tools
            .initialize_internal_tools(
                InternalToolServices::with_storage(Arc::clone(&storage)),
                config.internal_tools.clone(),
            )
            .await;

        let llm_factory = Arc::new(ProviderLlmFactory::new(Arc::clone(&providers)));
        llm_factory.validate(&config.llm)?;

        let events = Arc::new(EventBus::new());
        let services = SessionServices {
            storage: Arc::clone(&storage),
            tools: Arc::clone(&tools),
            llm_factory,
            events: Arc::clone(&events),
        };
        let sessions = Arc::new(SessionManager::new(
            services,
            config.llm.clone(),
            config.sessions.clone(),
        ));
        sessions.init().await?;

        info!(
            "agent runtime started: provider={}, model={}, max_sessions={}",
            config.llm.provider, config.llm.model, config.sessions.max_sessions
        );
        Ok(Self {
            config,
            providers,
            storage,
            tools,
            events,
            sessions,
            #[cfg(feature = "mcp")]
            mcp: None,
        })
    }

    /// Run one turn on `session_id`, creating the session if it does not exist.
    pub async fn run(
        &self,
        session_id: &str,
        input: &str,
        image: Option<ImageData>,
        file: Option<FileData>,
        stream: bool,
    ) -> Result<String> {
        let session = match self.sessions.get_session(session_id).await? {
            Some(session) => session,
            None => self.sessions.create_session(Some(session_id)).await?,
        };
        let response = session.run(input, image, file, stream).await?;
        self.sessions.increment_message_count(session_id).await?;
        Ok(response)
    }

    pub async fn reset_session(&self, session_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        session.reset().await
    }

    /// Switch one session, or every resident session when `session_id` is `None`.
    pub async fn switch_llm(
        &self,
        update: &LlmConfigUpdate,
        session_id: Option<&str>,
    ) -> Result<SwitchLlmResult> {
        match session_id {
            None => Ok(self.sessions.switch_llm_for_all_sessions(update).await),
            Some(id) => {
                let config = self
                    .sessions
                    .switch_llm_for_specific_session(id, update)
                    .await?;
                Ok(SwitchLlmResult {
                    message: format!("switched session '{id}' to {}/{}", config.provider, config.model),
                    switched_sessions: vec![id.to_string()],
                    ..SwitchLlmResult::default()
                })
            }
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn tools(&self) -> &Arc<ToolManager> {
        &self.tools
    }

    /// Global bus. Every session event arrives here tagged with `sessionId`.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub async fn shutdown(&self) {
        self.sessions.cleanup().await;
        #[cfg(feature = "mcp")]
        if let Some(mcp) = &self.mcp {
            mcp.disconnect_all().await;
        }
        info!("agent runtime stopped");
    }
}

pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryBackend::new())),
        StorageConfig::Sqlite { path } => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Arc::new(SqliteBackend::open(path)?))
        }
    }
}
