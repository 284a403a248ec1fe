pub mod history;
pub mod memory_backend;
pub mod migrations;
pub mod session_store;
pub mod sqlite_backend;
pub mod storage;

pub use history::{MESSAGES_KEY_PREFIX, SessionHistory};
pub use memory_backend::InMemoryBackend;
pub use session_store::{SESSION_KEY_PREFIX, SessionMetadata, SessionStore};
pub use sqlite_backend::SqliteBackend;
pub use storage::StorageBackend;
