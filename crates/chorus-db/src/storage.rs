use async_trait::async_trait;
use chorus_common::Result;
use serde_json::Value;

/// Narrow storage contract the session core depends on: a keyed value store
/// plus append-only lists for message history.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove the value and any list stored under `key`.
    /// Returns `true` if something was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Keys of keyed values starting with `prefix`, sorted. A trailing `*`
    /// is accepted and ignored. Lists are not included.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn append(&self, key: &str, item: Value) -> Result<()>;

    /// Items in `start..end` (end exclusive, clamped to the list length).
    async fn get_range(&self, key: &str, start: usize, end: usize) -> Result<Vec<Value>>;

    async fn get_length(&self, key: &str) -> Result<usize>;
}

pub(crate) fn normalize_prefix(pattern: &str) -> &str {
    pattern.strip_suffix('*').unwrap_or(pattern)
}
