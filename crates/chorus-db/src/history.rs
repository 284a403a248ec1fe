use std::sync::Arc;

use chorus_common::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::storage::StorageBackend;

pub const MESSAGES_KEY_PREFIX: &str = "messages:";

/// Append-only message log for one session, stored as a list at
/// `messages:<id>`. Sessions never see each other's keys.
#[derive(Clone)]
pub struct SessionHistory {
    backend: Arc<dyn StorageBackend>,
    session_id: String,
    key: String,
}

impl SessionHistory {
    pub fn new(backend: Arc<dyn StorageBackend>, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let key = format!("{MESSAGES_KEY_PREFIX}{session_id}");
        Self {
            backend,
            session_id,
            key,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn append<T: Serialize>(&self, message: &T) -> Result<()> {
        self.backend
            .append(&self.key, serde_json::to_value(message)?)
            .await
    }

    pub async fn len(&self) -> Result<usize> {
        self.backend.get_length(&self.key).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn load_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let len = self.len().await?;
        self.load_range(0, len).await
    }

    pub async fn load_range<T: DeserializeOwned>(&self, start: usize, end: usize) -> Result<Vec<T>> {
        self.backend
            .get_range(&self.key, start, end)
            .await?
            .into_iter()
            .map(|value| {
                serde_json::from_value(value).map_err(|e| {
                    Error::Storage(format!("corrupt entry in '{}': {e}", self.key))
                })
            })
            .collect()
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.delete(&self.key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::InMemoryBackend;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Line {
        text: String,
    }

    fn line(text: &str) -> Line {
        Line {
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn histories_are_partitioned_by_session() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let a = SessionHistory::new(backend.clone(), "a");
        let b = SessionHistory::new(backend.clone(), "b");

        a.append(&line("hello from a")).await.unwrap();
        b.append(&line("hello from b")).await.unwrap();
        a.append(&line("again a")).await.unwrap();

        let a_lines: Vec<Line> = a.load_all().await.unwrap();
        assert_eq!(a_lines, vec![line("hello from a"), line("again a")]);
        assert_eq!(b.len().await.unwrap(), 1);
        assert_eq!(a.key(), "messages:a");
    }

    #[tokio::test]
    async fn clear_empties_only_this_session() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let a = SessionHistory::new(backend.clone(), "a");
        let b = SessionHistory::new(backend, "b");
        a.append(&line("x")).await.unwrap();
        b.append(&line("y")).await.unwrap();

        a.clear().await.unwrap();
        assert!(a.is_empty().await.unwrap());
        assert!(!b.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn undecodable_entries_are_storage_errors() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        backend.append("messages:a", serde_json::json!(42)).await.unwrap();
        let history = SessionHistory::new(backend, "a");

        let err = history.load_all::<Line>().await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().contains("messages:a"));
    }
}
