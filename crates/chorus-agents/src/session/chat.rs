use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use chorus_common::{Error, Result};
use chorus_config::LlmConfig;
use chorus_db::{SessionHistory, SessionStore, StorageBackend};
use serde_json::json;
use tracing::{debug, info};

use crate::context::{
    ContextManager, FileData, ImageData, InternalMessage, formatter_for, tokenizer_for,
};
use crate::events::{self, AgentEvent, EventBus, SubscriptionId, with_session_id};
use crate::llm::{LlmService, LlmServiceDeps, LlmServiceFactory};
use crate::tools::ToolManager;

/// Shared collaborators every session is built from.
#[derive(Clone)]
pub struct SessionServices {
    pub storage: Arc<dyn StorageBackend>,
    pub tools: Arc<ToolManager>,
    pub llm_factory: Arc<dyn LlmServiceFactory>,
    /// Global bus that session events are forwarded to.
    pub events: Arc<EventBus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Constructed,
    Initialized,
    Active,
    Disposed,
}

/// One isolated conversation: a stable id bound to persisted history, a
/// swappable LLM service and a session-local event bus.
pub struct ChatSession {
    id: String,
    services: SessionServices,
    events: Arc<EventBus>,
    forwarders: Mutex<HashMap<&'static str, SubscriptionId>>,
    config: RwLock<LlmConfig>,
    context: OnceLock<Arc<ContextManager>>,
    llm: RwLock<Option<Arc<dyn LlmService>>>,
    /// Serializes turns and model switches on this session.
    run_lock: tokio::sync::Mutex<()>,
    state: Mutex<SessionState>,
}

impl ChatSession {
    /// Wires event forwarding. Call [`init`](ChatSession::init) before use.
    pub fn new(id: impl Into<String>, config: LlmConfig, services: SessionServices) -> Self {
        let id = id.into();
        let events = Arc::new(EventBus::new());

        let mut forwarders = HashMap::new();
        for name in events::SESSION_EVENTS {
            let global = Arc::clone(&services.events);
            let session_id = id.clone();
            let subscription = events.on(
                name,
                Arc::new(move |event: &AgentEvent| {
                    global.emit(&event.name, with_session_id(&event.payload, &session_id));
                }),
            );
            forwarders.insert(name, subscription);
        }

        Self {
            id,
            services,
            events,
            forwarders: Mutex::new(forwarders),
            config: RwLock::new(config),
            context: OnceLock::new(),
            llm: RwLock::new(None),
            run_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SessionState::Constructed),
        }
    }

    /// Build history, then context, then the LLM service. Must be called
    /// exactly once.
    pub async fn init(&self) -> Result<()> {
        if self.state() != SessionState::Constructed {
            return Err(Error::Agent(format!(
                "session '{}' is already initialized",
                self.id
            )));
        }

        let config = self.config();
        let factory = &self.services.llm_factory;

        let history = SessionHistory::new(Arc::clone(&self.services.storage), self.id.clone());
        let context = Arc::new(ContextManager::new(
            history,
            factory.max_input_tokens(&config),
            tokenizer_for(&config.provider),
            formatter_for(&config.provider, config.router),
        ));
        let llm = factory.create(config, self.deps(Arc::clone(&context)))?;

        self.context.set(context).map_err(|_| {
            Error::Agent(format!("session '{}' is already initialized", self.id))
        })?;
        *self.llm.write().unwrap_or_else(PoisonError::into_inner) = Some(llm);
        self.set_state(SessionState::Initialized);
        debug!("session '{}' initialized", self.id);
        Ok(())
    }

    pub async fn run(
        &self,
        input: &str,
        image: Option<ImageData>,
        file: Option<FileData>,
        stream: bool,
    ) -> Result<String> {
        let _turn = self.run_lock.lock().await;
        if self.state() == SessionState::Disposed {
            return Err(Error::Agent(format!("session '{}' has been disposed", self.id)));
        }
        let llm = self.llm()?;
        self.set_state(SessionState::Active);
        llm.complete_task(input, image, file, stream).await
    }

    pub async fn get_history(&self) -> Result<Vec<InternalMessage>> {
        self.context()?.get_history().await
    }

    /// Clear history, keeping the id and model configuration.
    pub async fn reset(&self) -> Result<()> {
        let _turn = self.run_lock.lock().await;
        self.context()?.reset_conversation().await?;
        self.events.emit(events::CONVERSATION_RESET, json!({}));
        info!("session '{}' conversation reset", self.id);
        Ok(())
    }

    /// Replace the LLM service, keeping the context manager and its history.
    /// The new config is stored with the session record so a rehydrated
    /// session comes back on the same model. The tokenizer is rebuilt only on a provider change, the formatter on a
    /// provider or routing change.
    pub async fn switch_llm(&self, new_config: LlmConfig) -> Result<()> {
        let _turn = self.run_lock.lock().await;
        let context = Arc::clone(self.context()?);
        self.llm()?;

        let factory = &self.services.llm_factory;
        factory.validate(&new_config)?;

        let current = self.config();
        let provider_changed = current.provider_changed(&new_config);
        let tokenizer = provider_changed.then(|| tokenizer_for(&new_config.provider));
        let formatter = (provider_changed || current.routing_changed(&new_config))
            .then(|| formatter_for(&new_config.provider, new_config.router));
        let max_input_tokens = factory.max_input_tokens(&new_config);

        let llm = factory.create(new_config.clone(), self.deps(Arc::clone(&context)))?;

        let config_value = serde_json::to_value(&new_config)?;
        let persisted = SessionStore::new(Arc::clone(&self.services.storage))
            .save_llm_config(&self.id, config_value.clone())
            .await?;
        if !persisted {
            debug!("session '{}' has no stored record, model config kept in memory", self.id);
        }

        context.update_config(max_input_tokens, tokenizer, formatter);
        *self.llm.write().unwrap_or_else(PoisonError::into_inner) = Some(llm);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config.clone();

        info!(
            "session '{}' switched to {}/{}",
            self.id, new_config.provider, new_config.model
        );
        self.events.emit(
            events::SWITCHED,
            json!({
                "config": config_value,
                "historyRetained": true,
            }),
        );
        Ok(())
    }

    /// Release in-memory resources. Persisted history is left alone, so the
    /// session can be rehydrated later.
    pub async fn cleanup(&self) -> Result<()> {
        let _turn = self.run_lock.lock().await;
        self.llm
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.dispose();
        Ok(())
    }

    /// Remove event forwarders. Idempotent.
    pub fn dispose(&self) {
        let mut forwarders = self.forwarders.lock().unwrap_or_else(PoisonError::into_inner);
        if forwarders.is_empty() {
            return;
        }
        for (_, subscription) in forwarders.drain() {
            self.events.off(subscription);
        }
        drop(forwarders);
        self.set_state(SessionState::Disposed);
        debug!("session '{}' disposed", self.id);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> LlmConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session-local bus. Events emitted here are also seen on the global bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn context(&self) -> Result<&Arc<ContextManager>> {
        self.context
            .get()
            .ok_or_else(|| Error::Agent(format!("session '{}' is not initialized", self.id)))
    }

    fn llm(&self) -> Result<Arc<dyn LlmService>> {
        self.llm
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Agent(format!("session '{}' is not initialized", self.id)))
    }

    fn deps(&self, context: Arc<ContextManager>) -> LlmServiceDeps {
        LlmServiceDeps {
            session_id: self.id.clone(),
            context,
            tools: Arc::clone(&self.services.tools),
            events: Arc::clone(&self.events),
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config();
        f.debug_struct("ChatSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("provider", &config.provider)
            .field("model", &config.model)
            .finish_non_exhaustive()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
