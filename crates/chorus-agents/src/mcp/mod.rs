mod manager;

pub use manager::{McpManager, McpToolClient, McpToolInfo};
