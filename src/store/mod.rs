//! Document store used by the account registry and the credits ledger.
//!
//! Documents are flat JSON objects grouped into named collections. The store
//! only knows about equality filters on a single field, which is all the
//! registry and the ledger need.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

pub type Document = Map<String, Value>;
pub type DocumentId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    UserCredits,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::UserCredits => "user_credits",
        }
    }

    /// Field whose value must be unique inside the collection.
    ///
    /// Mirrors `documents_username_unique_idx` in the migrations.
    pub fn unique_field(self) -> Option<&'static str> {
        match self {
            Collection::Users | Collection::UserCredits => Some("username"),
        }
    }
}

/// Equality filter on one top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.get(&self.field) == Some(&self.value)
    }

    /// The filter as a single-field document, used for JSONB containment.
    pub fn as_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(self.field.clone(), self.value.clone());
        doc
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub body: Document,
}

impl StoredDocument {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(Value::Object(self.body.clone()))
            .map_err(|e| StoreError::Malformed(e.to_string()))
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value).map_err(|e| StoreError::Malformed(e.to_string()))? {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::Malformed(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("document violates a uniqueness constraint")]
    Conflict,
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error("document store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// First document (in insertion order) matching `filter`.
    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<StoredDocument>, StoreError>;

    /// Every document of the collection in insertion order.
    async fn find_all(&self, collection: Collection) -> Result<Vec<StoredDocument>, StoreError>;

    async fn insert_one(
        &self,
        collection: Collection,
        doc: Document,
    ) -> Result<DocumentId, StoreError>;

    /// Inserts `doc` unless a document matching `filter` already exists.
    /// Returns `true` when a document was inserted.
    async fn insert_if_absent(
        &self,
        collection: Collection,
        filter: &Filter,
        doc: Document,
    ) -> Result<bool, StoreError>;

    /// Merges `fields` into the first document matching `filter`.
    /// Returns `false` when nothing matched.
    async fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        fields: Document,
    ) -> Result<bool, StoreError>;

    /// Atomically adds `amount` to the integer `field` of the first document
    /// matching `filter` and returns the new value. A missing field counts as 0.
    async fn increment(
        &self,
        collection: Collection,
        filter: &Filter,
        field: &str,
        amount: i64,
    ) -> Result<Option<i64>, StoreError>;

    async fn delete_one(&self, collection: Collection, id: DocumentId) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        username: String,
        credits: i64,
    }

    #[test]
    fn filter_matches_exact_value_only() {
        let doc = encode(&Sample {
            username: "a@b.com".into(),
            credits: 3,
        })
        .unwrap();
        assert!(Filter::eq("username", "a@b.com").matches(&doc));
        assert!(!Filter::eq("username", "A@b.com").matches(&doc));
        assert!(Filter::eq("credits", 3).matches(&doc));
        assert!(!Filter::eq("credits", "3").matches(&doc));
        assert!(!Filter::eq("missing", "x").matches(&doc));
    }

    #[test]
    fn decode_reports_malformed_documents() {
        let stored = StoredDocument {
            id: Uuid::new_v4(),
            body: json!({ "username": "a@b.com" }).as_object().unwrap().clone(),
        };
        let err = stored.decode::<Sample>().unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn encode_rejects_non_objects() {
        let err = encode(&42).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }
}
