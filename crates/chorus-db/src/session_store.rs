use std::sync::Arc;
use std::time::Duration;

use chorus_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StorageBackend;

pub const SESSION_KEY_PREFIX: &str = "session:";

/// Durable record of a session, independent of whether it is resident in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    /// Model configuration the session last switched to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_config: Option<serde_json::Value>,
}

impl SessionMetadata {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_activity: now,
            message_count: 0,
            llm_config: None,
        }
    }

    /// True when the session has been idle for longer than `ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.last_activity) > ttl,
            Err(_) => false,
        }
    }
}

pub fn session_key(session_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{session_id}")
}

/// Typed access to `session:<id>` metadata records.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub async fn load(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        match self.backend.get(&session_key(session_id)).await? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                Error::Storage(format!("corrupt session record '{session_id}': {e}"))
            }),
            None => Ok(None),
        }
    }

    pub async fn save(&self, session_id: &str, metadata: &SessionMetadata) -> Result<()> {
        self.backend
            .set(&session_key(session_id), serde_json::to_value(metadata)?)
            .await
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        self.backend.delete(&session_key(session_id)).await
    }

    /// Ids of every persisted session, sorted.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let keys = self.backend.list(SESSION_KEY_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(SESSION_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    /// Bump `last_activity` to `now`. Returns the updated record, or `None`
    /// if the session was never persisted.
    pub async fn touch(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionMetadata>> {
        let Some(mut metadata) = self.load(session_id).await? else {
            return Ok(None);
        };
        metadata.last_activity = now;
        self.save(session_id, &metadata).await?;
        Ok(Some(metadata))
    }

    /// Record the session's model configuration. Returns `false` if the
    /// session was never persisted.
    pub async fn save_llm_config(&self, session_id: &str, config: serde_json::Value) -> Result<bool> {
        let Some(mut metadata) = self.load(session_id).await? else {
            return Ok(false);
        };
        metadata.llm_config = Some(config);
        self.save(session_id, &metadata).await?;
        Ok(true)
    }

    pub async fn increment_message_count(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionMetadata>> {
        let Some(mut metadata) = self.load(session_id).await? else {
            return Ok(None);
        };
        metadata.message_count += 1;
        metadata.last_activity = now;
        self.save(session_id, &metadata).await?;
        Ok(Some(metadata))
    }
}
