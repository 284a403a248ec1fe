/// Errors shared by every Chorus crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution denied: {0}")]
    ToolDenied(String),

    #[error("session limit reached (max {max} sessions)")]
    SessionLimitReached { max: usize },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid LLM config: {0}")]
    InvalidLlmConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
