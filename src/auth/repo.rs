use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{encode, Collection, DocumentId, DocumentStore, StoreError, StoredDocument};

pub type AccountId = DocumentId;

/// User document in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    #[serde(rename = "password")]
    pub password_hash: String, // Argon2 PHC string
}

/// A stored user together with its document id.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub password_hash: String,
}

impl TryFrom<StoredDocument> for Account {
    type Error = StoreError;

    fn try_from(doc: StoredDocument) -> Result<Self, Self::Error> {
        let UserRecord {
            username,
            password_hash,
        } = doc.decode()?;
        Ok(Self {
            id: doc.id,
            username,
            password_hash,
        })
    }
}

impl UserRecord {
    /// All accounts in insertion order. Documents that do not decode as a
    /// user are skipped.
    pub async fn all(store: &dyn DocumentStore) -> Result<Vec<Account>, StoreError> {
        let docs = store.find_all(Collection::Users).await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| {
                let id = doc.id;
                Account::try_from(doc)
                    .map_err(|e| warn!(%id, error = %e, "skipping malformed user document"))
                    .ok()
            })
            .collect())
    }

    pub async fn insert(&self, store: &dyn DocumentStore) -> Result<AccountId, StoreError> {
        store.insert_one(Collection::Users, encode(self)?).await
    }

    pub async fn delete(store: &dyn DocumentStore, id: AccountId) -> Result<bool, StoreError> {
        store.delete_one(Collection::Users, id).await
    }
}
