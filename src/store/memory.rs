use super::DocumentStore;
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// In-process document store, used for ephemeral runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn set(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some()))
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}
