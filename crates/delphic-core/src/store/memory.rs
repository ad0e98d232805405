//! In-memory [`CollectionStore`] implementation for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Ids are assigned
//! from a counter, or supplied explicitly with
//! [`InMemoryStore::insert_collection_with_id`].

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Collection, CollectionStatus, Document, NewCollection, NewDocument};

use super::CollectionStore;

#[derive(Default)]
struct Inner {
    collections: HashMap<i64, Collection>,
    documents: Vec<Document>,
    next_collection_id: i64,
    next_document_id: i64,
}

/// In-memory store for tests.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_collection_id: 1,
                next_document_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Insert a `PENDING` collection under a caller-chosen id.
    pub fn insert_collection_with_id(&self, id: i64, new: &NewCollection) -> Collection {
        insert(&mut self.inner.write().unwrap(), id, new)
    }
}

fn insert(inner: &mut Inner, id: i64, new: &NewCollection) -> Collection {
    let now = chrono::Utc::now().timestamp();
    let collection = Collection {
        id,
        title: new.title.clone(),
        description: new.description.clone(),
        status: CollectionStatus::Pending,
        model: None,
        created_at: now,
        updated_at: now,
    };
    inner.next_collection_id = inner.next_collection_id.max(id + 1);
    inner.collections.insert(id, collection.clone());
    collection
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CollectionStore for InMemoryStore {
    async fn create_collection(&self, new: &NewCollection) -> Result<Collection> {
        let mut inner = self.inner.write().unwrap();
        let id = inner.next_collection_id;
        Ok(insert(&mut inner, id, new))
    }

    async fn add_document(&self, collection_id: i64, doc: &NewDocument) -> Result<i64> {
        let mut inner = self.inner.write().unwrap();
        if !inner.collections.contains_key(&collection_id) {
            return Err(anyhow!("collection {} not found", collection_id));
        }
        let id = inner.next_document_id;
        inner.next_document_id += 1;
        inner.documents.push(Document {
            id,
            collection_id,
            file_name: doc.file_name.clone(),
            content: doc.content.clone(),
            created_at: chrono::Utc::now().timestamp(),
        });
        Ok(id)
    }

    async fn get_collection(&self, id: i64) -> Result<Option<Collection>> {
        Ok(self.inner.read().unwrap().collections.get(&id).cloned())
    }

    async fn list_documents(&self, collection_id: i64) -> Result<Vec<Document>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .documents
            .iter()
            .filter(|d| d.collection_id == collection_id)
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: i64, status: CollectionStatus) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let collection = inner
            .collections
            .get_mut(&id)
            .ok_or_else(|| anyhow!("collection {} not found", id))?;
        collection.status = collection.status.transition(status)?;
        collection.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }

    async fn set_model(&self, id: i64, model: Option<&str>) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let collection = inner
            .collections
            .get_mut(&id)
            .ok_or_else(|| anyhow!("collection {} not found", id))?;
        collection.model = model.map(str::to_string);
        Ok(())
    }
}
