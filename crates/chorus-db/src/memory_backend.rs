use std::collections::HashMap;

use async_trait::async_trait;
use chorus_common::Result;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::storage::{StorageBackend, normalize_prefix};

/// Process-local backend. Data lives as long as the value does.
#[derive(Default)]
pub struct InMemoryBackend {
    values: RwLock<HashMap<String, Value>>,
    lists: RwLock<HashMap<String, Vec<Value>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let had_value = self.values.write().await.remove(key).is_some();
        let had_list = self.lists.write().await.remove(key).is_some();
        Ok(had_value || had_list)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = normalize_prefix(prefix);
        let mut keys: Vec<String> = self
            .values
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn append(&self, key: &str, item: Value) -> Result<()> {
        self.lists
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push(item);
        Ok(())
    }

    async fn get_range(&self, key: &str, start: usize, end: usize) -> Result<Vec<Value>> {
        let lists = self.lists.read().await;
        let Some(items) = lists.get(key) else {
            return Ok(Vec::new());
        };
        let end = end.min(items.len());
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(items[start..end].to_vec())
    }

    async fn get_length(&self, key: &str) -> Result<usize> {
        Ok(self.lists.read().await.get(key).map_or(0, Vec::len))
    }
}
