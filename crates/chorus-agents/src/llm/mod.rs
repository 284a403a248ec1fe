mod tool_loop;

use std::sync::Arc;

use async_trait::async_trait;
use chorus_common::{Error, Result};
use chorus_config::LlmConfig;

pub use tool_loop::ToolLoopLlmService;

use crate::context::{ContextManager, FileData, ImageData};
use crate::events::EventBus;
use crate::providers::ProviderRegistry;
use crate::tools::ToolManager;

/// Input budget used when neither the config nor the provider names one.
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 100_000;

/// Completes one conversational turn, including any tool round trips.
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete_task(
        &self,
        input: &str,
        image: Option<ImageData>,
        file: Option<FileData>,
        stream: bool,
    ) -> Result<String>;

    fn config(&self) -> &LlmConfig;
}

/// Collaborators handed to a new LLM service. The context manager is shared
/// with the session and outlives any single service.
#[derive(Clone)]
pub struct LlmServiceDeps {
    pub session_id: String,
    pub context: Arc<ContextManager>,
    pub tools: Arc<ToolManager>,
    pub events: Arc<EventBus>,
}

pub trait LlmServiceFactory: Send + Sync {
    /// Reject configs this factory cannot serve.
    fn validate(&self, config: &LlmConfig) -> Result<()>;

    fn max_input_tokens(&self, config: &LlmConfig) -> usize {
        config.max_input_tokens.unwrap_or(DEFAULT_MAX_INPUT_TOKENS)
    }

    fn create(&self, config: LlmConfig, deps: LlmServiceDeps) -> Result<Arc<dyn LlmService>>;
}

/// Builds [`ToolLoopLlmService`]s over providers from a registry.
pub struct ProviderLlmFactory {
    registry: Arc<ProviderRegistry>,
}

impl ProviderLlmFactory {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }
}

impl LlmServiceFactory for ProviderLlmFactory {
    fn validate(&self, config: &LlmConfig) -> Result<()> {
        config.validate()?;
        let provider = self.registry.get(&config.provider).ok_or_else(|| {
            Error::InvalidLlmConfig(format!("unknown provider '{}'", config.provider))
        })?;
        if !provider.supports_model(&config.model) {
            return Err(Error::InvalidLlmConfig(format!(
                "provider '{}' does not support model '{}'",
                config.provider, config.model
            )));
        }
        Ok(())
    }

    fn max_input_tokens(&self, config: &LlmConfig) -> usize {
        config
            .max_input_tokens
            .or_else(|| {
                self.registry
                    .get(&config.provider)
                    .and_then(|p| p.max_input_tokens(&config.model))
            })
            .unwrap_or(DEFAULT_MAX_INPUT_TOKENS)
    }

    fn create(&self, config: LlmConfig, deps: LlmServiceDeps) -> Result<Arc<dyn LlmService>> {
        self.validate(&config)?;
        let provider = self.registry.get(&config.provider).ok_or_else(|| {
            Error::InvalidLlmConfig(format!("unknown provider '{}'", config.provider))
        })?;
        Ok(Arc::new(ToolLoopLlmService::new(provider, config, deps)))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::providers::{LlmProvider, LlmRequest, LlmResponse};

    struct Limited;

    #[async_trait]
    impl LlmProvider for Limited {
        fn provider_id(&self) -> &str {
            "limited"
        }

        fn supports_model(&self, model: &str) -> bool {
            model.starts_with("small-")
        }

        fn max_input_tokens(&self, _model: &str) -> Option<usize> {
            Some(8_000)
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse> {
            Err(Error::Agent("unused".into()))
        }
    }

    fn factory() -> ProviderLlmFactory {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(Limited));
        ProviderLlmFactory::new(Arc::new(registry))
    }

    fn config(provider: &str, model: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.into(),
            model: model.into(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn validate_checks_provider_and_model() {
        let factory = factory();
        assert!(factory.validate(&config("limited", "small-1")).is_ok());
        assert!(matches!(
            factory.validate(&config("limited", "huge-1")),
            Err(Error::InvalidLlmConfig(_))
        ));
        assert!(matches!(
            factory.validate(&config("missing", "small-1")),
            Err(Error::InvalidLlmConfig(_))
        ));
    }

    #[test]
    fn max_input_tokens_prefers_config_then_provider() {
        let factory = factory();
        assert_eq!(factory.max_input_tokens(&config("limited", "small-1")), 8_000);

        let mut explicit = config("limited", "small-1");
        explicit.max_input_tokens = Some(1_234);
        assert_eq!(factory.max_input_tokens(&explicit), 1_234);

        assert_eq!(
            factory.max_input_tokens(&config("missing", "x")),
            DEFAULT_MAX_INPUT_TOKENS
        );
    }
}
