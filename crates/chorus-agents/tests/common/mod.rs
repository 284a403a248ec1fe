#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chorus_agents::events::{AgentEvent, EventBus, WILDCARD};
use chorus_agents::llm::LlmServiceFactory;
use chorus_agents::providers::{ContentBlock, LlmProvider, LlmRequest, LlmResponse};
use chorus_agents::session::SessionServices;
use chorus_agents::tools::{
    AutoApproveConfirmation, ToolDefinition, ToolManager, ToolMap, ToolOutput, ToolParameters,
    ToolSource,
};
use chorus_agents::{ProviderLlmFactory, ProviderRegistry};
use chorus_common::{Error, Result};
use chorus_config::LlmConfig;
use chorus_db::{InMemoryBackend, StorageBackend};
use serde_json::{Value, json};

/// Tool source with a fixed tool map that records every call.
pub struct MockToolSource {
    tools: ToolMap,
    pub discoveries: AtomicUsize,
    pub calls: Mutex<Vec<(String, Value, Option<String>)>>,
    fail_discovery: bool,
    discovery_delay: Duration,
}

impl MockToolSource {
    pub fn new(names: &[&str]) -> Self {
        let tools = names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    ToolDefinition::new(*name, format!("{name} tool"), ToolParameters::default()),
                )
            })
            .collect();
        Self {
            tools,
            discoveries: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            fail_discovery: false,
            discovery_delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_discovery: true,
            ..Self::new(&[])
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = delay;
        self
    }

    pub fn discovery_count(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }

    pub fn called_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl ToolSource for MockToolSource {
    async fn get_all_tools(&self) -> Result<ToolMap> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        if !self.discovery_delay.is_zero() {
            tokio::time::sleep(self.discovery_delay).await;
        }
        if self.fail_discovery {
            return Err(Error::Mcp("server unreachable".into()));
        }
        Ok(self.tools.clone())
    }

    async fn execute_tool(
        &self,
        name: &str,
        args: Value,
        session_id: Option<&str>,
    ) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push((
            name.to_string(),
            args.clone(),
            session_id.map(str::to_string),
        ));
        match name {
            "explode" => Err(Error::Tool("boom".into())),
            _ if self.tools.contains_key(name) => Ok(ToolOutput::success(format!("{name} ran"))),
            _ => Err(Error::ToolNotFound(name.to_string())),
        }
    }
}

/// Provider that replays queued responses, then answers with a fixed text.
pub struct ScriptedProvider {
    id: String,
    model_prefix: String,
    script: Mutex<VecDeque<LlmResponse>>,
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            model_prefix: String::new(),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Only models starting with `prefix` are accepted.
    pub fn with_model_prefix(mut self, prefix: &str) -> Self {
        self.model_prefix = prefix.to_string();
        self
    }

    pub fn push(&self, content: Vec<ContentBlock>) {
        self.script.lock().unwrap().push_back(LlmResponse {
            content,
            model: "scripted".into(),
            usage: None,
            stop_reason: None,
        });
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn supports_model(&self, model: &str) -> bool {
        model.starts_with(&self.model_prefix)
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| LlmResponse {
            content: vec![ContentBlock::Text {
                text: format!("reply from {}", self.id),
            }],
            model: request.model.clone(),
            usage: None,
            stop_reason: Some("end_turn".into()),
        }))
    }
}

pub fn tool_use(id: &str, name: &str, input: Value) -> ContentBlock {
    ContentBlock::ToolUse {
        id: id.to_string(),
        name: name.to_string(),
        input,
    }
}

pub fn text(text: &str) -> ContentBlock {
    ContentBlock::Text {
        text: text.to_string(),
    }
}

pub fn llm_config(provider: &str, model: &str) -> LlmConfig {
    LlmConfig {
        provider: provider.to_string(),
        model: model.to_string(),
        ..LlmConfig::default()
    }
}

/// Everything a session test needs, over in-memory storage.
pub struct Harness {
    pub storage: Arc<dyn StorageBackend>,
    pub registry: Arc<ProviderRegistry>,
    pub remote: Arc<MockToolSource>,
    pub tools: Arc<ToolManager>,
    pub events: Arc<EventBus>,
    pub factory: Arc<dyn LlmServiceFactory>,
}

impl Harness {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        let registry = Arc::new(ProviderRegistry::new());
        for provider in providers {
            registry.register(provider);
        }
        let remote = Arc::new(MockToolSource::new(&["read_file"]));
        let tools = Arc::new(ToolManager::new(
            remote.clone(),
            Arc::new(AutoApproveConfirmation),
        ));
        Self {
            storage: Arc::new(InMemoryBackend::new()),
            factory: Arc::new(ProviderLlmFactory::new(Arc::clone(&registry))),
            registry,
            remote,
            tools,
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn services(&self) -> SessionServices {
        SessionServices {
            storage: Arc::clone(&self.storage),
            tools: Arc::clone(&self.tools),
            llm_factory: Arc::clone(&self.factory),
            events: Arc::clone(&self.events),
        }
    }

    /// Record every event reaching the global bus.
    pub fn record_events(&self) -> Arc<Mutex<Vec<AgentEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        self.events.on(
            WILDCARD,
            Arc::new(move |event: &AgentEvent| sink.lock().unwrap().push(event.clone())),
        );
        seen
    }
}

pub fn events_named(seen: &Mutex<Vec<AgentEvent>>, name: &str) -> Vec<AgentEvent> {
    seen.lock()
        .unwrap()
        .iter()
        .filter(|e| e.name == name)
        .cloned()
        .collect()
}

pub fn empty_args() -> Value {
    json!({})
}
