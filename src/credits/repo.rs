use serde::{Deserialize, Serialize};

use crate::store::{encode, Collection, DocumentStore, Filter, StoreError};

pub const CREDITS_FIELD: &str = "credits";

/// Balance document in the `user_credits` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsRecord {
    pub username: String,
    #[serde(default)]
    pub credits: i64,
}

fn by_username(username: &str) -> Filter {
    Filter::eq("username", username)
}

impl CreditsRecord {
    pub async fn find(
        store: &dyn DocumentStore,
        username: &str,
    ) -> Result<Option<CreditsRecord>, StoreError> {
        match store
            .find_one(Collection::UserCredits, &by_username(username))
            .await?
        {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Inserts the record unless one already exists for the username.
    pub async fn insert_if_absent(&self, store: &dyn DocumentStore) -> Result<bool, StoreError> {
        store
            .insert_if_absent(Collection::UserCredits, &by_username(&self.username), encode(self)?)
            .await
    }

    /// Adds `amount` in one storage-side operation; `None` if no record exists.
    pub async fn increment(
        store: &dyn DocumentStore,
        username: &str,
        amount: i64,
    ) -> Result<Option<i64>, StoreError> {
        store
            .increment(Collection::UserCredits, &by_username(username), CREDITS_FIELD, amount)
            .await
    }
}
