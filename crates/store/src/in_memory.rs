//! In-memory store, useful for testing and ephemeral builds.

use async_trait::async_trait;
use buildloop_core::{ArtifactStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Collections = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// A store that keeps every document in a nested map.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    collections: Arc<RwLock<Collections>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of documents across all collections.
    pub async fn len(&self) -> usize {
        self.collections.read().await.values().map(|c| c.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn store(
        &self,
        collection: &str,
        key: &str,
        document: serde_json::Value,
    ) -> Result<(), StoreError> {
        crate::check_key(collection, key)?;
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), document);
        Ok(())
    }

    async fn fetch(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        crate::check_key(collection, key)?;
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|c| c.get(key)).cloned())
    }

    async fn keys(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        crate::check_collection(collection)?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn store_and_fetch() {
        let store = InMemoryStore::new();
        store.store("plans", "b1", json!({"summary": "todo app"})).await.unwrap();

        let doc = store.fetch("plans", "b1").await.unwrap().unwrap();
        assert_eq!(doc["summary"], "todo app");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = InMemoryStore::new();
        assert!(store.fetch("plans", "nope").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn store_replaces_existing_document() {
        let store = InMemoryStore::new();
        store.store("files", "k", json!(1)).await.unwrap();
        store.store("files", "k", json!(2)).await.unwrap();
        assert_eq!(store.fetch("files", "k").await.unwrap(), Some(json!(2)));
        assert_eq!(store.keys("files").await.unwrap(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn rejects_path_like_keys() {
        let store = InMemoryStore::new();
        let err = store.store("plans", "../x", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
        let err = store.keys("..").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }
}
