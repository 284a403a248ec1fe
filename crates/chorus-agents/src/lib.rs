pub mod context;
pub mod events;
pub mod llm;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod providers;
pub mod runtime;
pub mod session;
pub mod tools;

pub use context::{ContextManager, FileData, ImageData, InternalMessage, MessageRole};
pub use events::{AgentEvent, EventBus, SubscriptionId};
pub use llm::{LlmService, LlmServiceDeps, LlmServiceFactory, ProviderLlmFactory};
pub use providers::{LlmProvider, LlmRequest, LlmResponse, ProviderRegistry};
pub use runtime::AgentRuntime;
pub use session::{ChatSession, SessionManager, SessionServices, SessionStats, SwitchLlmResult};
pub use tools::{
    ToolCatalog, ToolDefinition, ToolManager, ToolOutput, ToolSource, ToolSourceKind, ToolStats,
};
