use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{Collection, Document, DocumentId, DocumentStore, Filter, StoreError, StoredDocument};

/// Process-local document store. Every operation runs under one lock, so
/// `increment` is atomic with respect to concurrent callers.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<Collection, Vec<StoredDocument>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Collection, Vec<StoredDocument>>>, StoreError> {
        self.collections
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

fn violates_unique(collection: Collection, docs: &[StoredDocument], doc: &Document) -> bool {
    let Some(field) = collection.unique_field() else {
        return false;
    };
    let Some(value) = doc.get(field) else {
        return false;
    };
    docs.iter().any(|d| d.body.get(field) == Some(value))
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .get(&collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(&d.body)))
            .cloned())
    }

    async fn find_all(&self, collection: Collection) -> Result<Vec<StoredDocument>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.get(&collection).cloned().unwrap_or_default())
    }

    async fn insert_one(
        &self,
        collection: Collection,
        doc: Document,
    ) -> Result<DocumentId, StoreError> {
        let mut guard = self.lock()?;
        let docs = guard.entry(collection).or_default();
        if violates_unique(collection, docs, &doc) {
            return Err(StoreError::Conflict);
        }
        let id = Uuid::new_v4();
        docs.push(StoredDocument { id, body: doc });
        Ok(id)
    }

    async fn insert_if_absent(
        &self,
        collection: Collection,
        filter: &Filter,
        doc: Document,
    ) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        let docs = guard.entry(collection).or_default();
        if docs.iter().any(|d| filter.matches(&d.body)) || violates_unique(collection, docs, &doc) {
            return Ok(false);
        }
        docs.push(StoredDocument {
            id: Uuid::new_v4(),
            body: doc,
        });
        Ok(true)
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        fields: Document,
    ) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        let Some(doc) = guard
            .get_mut(&collection)
            .and_then(|docs| docs.iter_mut().find(|d| filter.matches(&d.body)))
        else {
            return Ok(false);
        };
        doc.body.extend(fields);
        Ok(true)
    }

    async fn increment(
        &self,
        collection: Collection,
        filter: &Filter,
        field: &str,
        amount: i64,
    ) -> Result<Option<i64>, StoreError> {
        let mut guard = self.lock()?;
        let Some(doc) = guard
            .get_mut(&collection)
            .and_then(|docs| docs.iter_mut().find(|d| filter.matches(&d.body)))
        else {
            return Ok(None);
        };
        let current = match doc.body.get(field) {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_i64()
                .ok_or_else(|| StoreError::Malformed(format!("field `{field}` is not an integer")))?,
        };
        let next = current
            .checked_add(amount)
            .ok_or_else(|| StoreError::Malformed(format!("field `{field}` overflowed")))?;
        doc.body.insert(field.to_string(), Value::from(next));
        Ok(Some(next))
    }

    async fn delete_one(&self, collection: Collection, id: DocumentId) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        let Some(docs) = guard.get_mut(&collection) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|d| d.id != id);
        Ok(docs.len() != before)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
