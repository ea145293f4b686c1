//! Read access to subscriber documents

use crate::error::StoreError;
use crate::store::{DocumentStore, USERS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// A subscriber, as stored in the `users` collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(skip)]
    pub id: String,
    pub region_code: String,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub notifications_enabled: bool,
}

impl User {
    fn from_document(id: String, document: Value) -> Result<Self, serde_json::Error> {
        let mut user: User = serde_json::from_value(document)?;
        user.id = id;
        Ok(user)
    }
}

#[derive(Clone)]
pub struct UserDirectory {
    documents: Arc<dyn DocumentStore>,
}

impl UserDirectory {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// Users with notifications switched on. Documents that do not match
    /// the user schema are logged and left out.
    pub async fn notification_enabled(&self) -> Result<Vec<User>, StoreError> {
        let documents = self.documents.list(USERS).await?;
        Ok(documents
            .into_iter()
            .filter_map(|(id, document)| match User::from_document(id.clone(), document) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(user_id = %id, error = %e, "Skipping malformed user document");
                    None
                }
            })
            .filter(|user| user.notifications_enabled)
            .collect())
    }

    pub async fn put(&self, user: &User) -> Result<(), StoreError> {
        self.documents
            .set(USERS, &user.id, serde_json::to_value(user)?)
            .await
    }

    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        self.documents.delete(USERS, id).await
    }
}
