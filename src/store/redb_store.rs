//! File-backed document store on redb
//!
//! One table per collection, keyed by document id, holding the JSON text of
//! the document. Blocking database work runs on the blocking thread pool.

use super::{DocumentStore, FORECASTS, USERS};
use crate::error::StoreError;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::task;

fn backend<E: Into<redb::Error>>(err: E) -> StoreError {
    let err: redb::Error = err.into();
    StoreError::classify(&err)
}

fn table(collection: &str) -> TableDefinition<'_, &'static str, &'static str> {
    TableDefinition::new(collection)
}

pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create the database, making sure the known collections exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend)?;
        let wt = db.begin_write().map_err(backend)?;
        for collection in [FORECASTS, USERS] {
            wt.open_table(table(collection)).map_err(backend)?;
        }
        wt.commit().map_err(backend)?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StoreError::unknown(format!("store task failed: {e}")))?
    }
}

fn read_one(db: &Database, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
    let rt = db.begin_read().map_err(backend)?;
    let table = match rt.open_table(table(collection)) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(backend(e)),
    };
    match table.get(id).map_err(backend)? {
        Some(raw) => Ok(Some(serde_json::from_str(raw.value())?)),
        None => Ok(None),
    }
}

fn read_all(db: &Database, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
    let rt = db.begin_read().map_err(backend)?;
    let table = match rt.open_table(table(collection)) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
        Err(e) => return Err(backend(e)),
    };

    let mut documents = Vec::new();
    for entry in table.iter().map_err(backend)? {
        let (key, value) = entry.map_err(backend)?;
        documents.push((key.value().to_string(), serde_json::from_str(value.value())?));
    }
    Ok(documents)
}

#[async_trait]
impl DocumentStore for RedbStore {
    async fn set(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        let collection = collection.to_string();
        let id = id.to_string();
        let text = serde_json::to_string(&document)?;
        self.blocking(move |db| {
            let wt = db.begin_write().map_err(backend)?;
            {
                let mut table = wt.open_table(table(&collection)).map_err(backend)?;
                table.insert(id.as_str(), text.as_str()).map_err(backend)?;
            }
            wt.commit().map_err(backend)
        })
        .await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.blocking(move |db| read_one(db, &collection, &id)).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.blocking(move |db| {
            let wt = db.begin_write().map_err(backend)?;
            let existed = {
                let mut table = wt.open_table(table(&collection)).map_err(backend)?;
                let removed = table.remove(id.as_str()).map_err(backend)?;
                removed.is_some()
            };
            wt.commit().map_err(backend)?;
            Ok(existed)
        })
        .await
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let collection = collection.to_string();
        self.blocking(move |db| read_all(db, &collection)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.redb");

        {
            let store = RedbStore::open(&path).unwrap();
            store
                .set(FORECASTS, "20261019-130000", json!({"generatedMessage": "Sunny."}))
                .await
                .unwrap();
            store
                .set(FORECASTS, "20261019-130000", json!({"generatedMessage": "Rainy."}))
                .await
                .unwrap();
        }

        let store = RedbStore::open(&path).unwrap();
        let doc = store.get(FORECASTS, "20261019-130000").await.unwrap().unwrap();
        assert_eq!(doc["generatedMessage"], "Rainy.");
        assert_eq!(store.list(FORECASTS).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_documents_and_collections() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(&dir.path().join("db.redb")).unwrap();

        assert!(store.get(USERS, "nobody").await.unwrap().is_none());
        assert!(store.get("unknown", "x").await.unwrap().is_none());
        assert!(store.list("unknown").await.unwrap().is_empty());
        assert!(!store.delete(USERS, "nobody").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(&dir.path().join("db.redb")).unwrap();
        store.set(USERS, "u2", json!({"regionCode": "130000"})).await.unwrap();
        store.set(USERS, "u1", json!({"regionCode": "270000"})).await.unwrap();

        let ids: Vec<_> = store.list(USERS).await.unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["u1", "u2"]);

        assert!(store.delete(USERS, "u1").await.unwrap());
        assert_eq!(store.list(USERS).await.unwrap().len(), 1);
    }
}
