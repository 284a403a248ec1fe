use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chorus_common::{Error, LogFormat, Result};
use serde::{Deserialize, Serialize};

/// Root configuration for a Chorus deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub sessions: SessionConfig,
    /// MCP servers keyed by a short server name.
    pub mcp: BTreeMap<String, McpServerConfig>,
    /// Internal tools to expose. Empty means none.
    pub internal_tools: Vec<String>,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.llm.validate()?;
        if self.sessions.max_sessions == 0 {
            return Err(Error::Config("sessions.max_sessions must be at least 1".into()));
        }
        if self.sessions.session_ttl_secs == 0 {
            return Err(Error::Config(
                "sessions.session_ttl_secs must be at least 1".into(),
            ));
        }
        for (name, server) in &self.mcp {
            if server.command.trim().is_empty() {
                return Err(Error::Config(format!(
                    "mcp server '{name}' has an empty command"
                )));
            }
        }
        Ok(())
    }
}

/// How requests reach the provider. Affects message formatting only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Talk to the provider's own API shape.
    #[default]
    Native,
    /// Go through an OpenAI-compatible gateway.
    Gateway,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub router: RoutingMode,
    pub system_prompt: Option<String>,
    /// Input budget override. When unset the provider's model limit is used.
    pub max_input_tokens: Option<usize>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// Upper bound on tool-use round trips per turn.
    pub max_iterations: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            router: RoutingMode::Native,
            system_prompt: None,
            max_input_tokens: None,
            max_output_tokens: None,
            temperature: None,
            max_iterations: 10,
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(Error::InvalidLlmConfig("provider must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::InvalidLlmConfig("model must not be empty".into()));
        }
        if let Some(t) = self.temperature.filter(|t| !(0.0..=2.0).contains(t)) {
            return Err(Error::InvalidLlmConfig(format!(
                "temperature {t} is outside 0.0..=2.0"
            )));
        }
        if self.max_input_tokens == Some(0) {
            return Err(Error::InvalidLlmConfig(
                "max_input_tokens must be positive".into(),
            ));
        }
        if self.max_output_tokens == Some(0) {
            return Err(Error::InvalidLlmConfig(
                "max_output_tokens must be positive".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidLlmConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Overlay `update` on top of this config.
    pub fn apply(&self, update: &LlmConfigUpdate) -> LlmConfig {
        let mut next = self.clone();
        if let Some(provider) = &update.provider {
            next.provider = provider.clone();
        }
        if let Some(model) = &update.model {
            next.model = model.clone();
        }
        if let Some(router) = update.router {
            next.router = router;
        }
        if let Some(prompt) = &update.system_prompt {
            next.system_prompt = Some(prompt.clone());
        }
        if let Some(max) = update.max_input_tokens {
            next.max_input_tokens = Some(max);
        }
        if let Some(max) = update.max_output_tokens {
            next.max_output_tokens = Some(max);
        }
        if let Some(t) = update.temperature {
            next.temperature = Some(t);
        }
        if let Some(n) = update.max_iterations {
            next.max_iterations = n;
        }
        next
    }

    pub fn provider_changed(&self, other: &LlmConfig) -> bool {
        self.provider != other.provider
    }

    pub fn routing_changed(&self, other: &LlmConfig) -> bool {
        self.router != other.router
    }
}

/// Partial LLM configuration used for live model/provider switching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfigUpdate {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub router: Option<RoutingMode>,
    pub system_prompt: Option<String>,
    pub max_input_tokens: Option<usize>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub max_iterations: Option<usize>,
}

impl LlmConfigUpdate {
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Self::default()
        }
    }

    pub fn provider_and_model(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            model: Some(model.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_sessions: usize,
    /// Idle time after which a resident session is evicted from memory.
    pub session_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            session_ttl_secs: 3600,
        }
    }
}

impl SessionConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

/// A stdio MCP server launched as a child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
}

fn default_mcp_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    pub fn format(&self) -> LogFormat {
        if self.json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }

    /// Install the global subscriber. `RUST_LOG` overrides `level`.
    pub fn init_tracing(&self) -> Result<()> {
        chorus_common::init_tracing(&self.level, self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sessions.max_sessions, 100);
        assert_eq!(config.sessions.session_ttl(), Duration::from_secs(3600));
        assert!(config.internal_tools.is_empty());
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.log.format(), LogFormat::Pretty);
    }

    #[test]
    fn apply_overlays_only_set_fields() {
        let base = LlmConfig {
            temperature: Some(0.3),
            ..LlmConfig::default()
        };
        let next = base.apply(&LlmConfigUpdate::model("gpt-4.1"));
        assert_eq!(next.model, "gpt-4.1");
        assert_eq!(next.provider, base.provider);
        assert_eq!(next.temperature, Some(0.3));
        assert!(!base.provider_changed(&next));
        assert!(!base.routing_changed(&next));
    }

    #[test]
    fn provider_and_routing_changes_are_detected() {
        let base = LlmConfig::default();
        let update = LlmConfigUpdate {
            provider: Some("anthropic".into()),
            router: Some(RoutingMode::Gateway),
            ..LlmConfigUpdate::default()
        };
        let next = base.apply(&update);
        assert!(base.provider_changed(&next));
        assert!(base.routing_changed(&next));
    }

    #[test]
    fn validate_rejects_bad_llm_values() {
        let mut config = LlmConfig::default();
        config.model = "  ".into();
        assert!(matches!(config.validate(), Err(Error::InvalidLlmConfig(_))));

        let config = LlmConfig {
            temperature: Some(3.5),
            ..LlmConfig::default()
        };
        assert!(config.validate().is_err());

        let config = LlmConfig {
            max_iterations: 0,
            ..LlmConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut config = AppConfig::default();
        config.sessions.max_sessions = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn storage_config_is_tagged_by_backend() {
        let yaml = "backend: sqlite\npath: /tmp/chorus.db\n";
        let storage: StorageConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            storage,
            StorageConfig::Sqlite {
                path: PathBuf::from("/tmp/chorus.db")
            }
        );
    }
}
