mod chat;
mod manager;

pub use chat::{ChatSession, SessionServices, SessionState};
pub use manager::{DEFAULT_SESSION_ID, SessionManager, SessionStats, SwitchLlmResult};
