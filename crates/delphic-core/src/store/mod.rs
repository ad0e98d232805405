//! Storage abstraction for collections and their documents.
//!
//! The [`CollectionStore`] trait is the only way the indexing job and the
//! engine factories touch persisted collection state, enabling pluggable
//! backends (SQLite in the service, in-memory in tests).
//!
//! Implementations must enforce the status state machine in
//! [`update_status`](CollectionStore::update_status) and be `Send + Sync`.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Collection, CollectionStatus, Document, NewCollection, NewDocument};

/// Abstract storage backend for collections.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_collection`](CollectionStore::create_collection) | Insert a `PENDING` collection |
/// | [`add_document`](CollectionStore::add_document) | Attach a file blob to a collection |
/// | [`get_collection`](CollectionStore::get_collection) | Fetch a collection by id |
/// | [`list_documents`](CollectionStore::list_documents) | All documents of a collection |
/// | [`update_status`](CollectionStore::update_status) | Checked status transition |
/// | [`set_model`](CollectionStore::set_model) | Record the artifact marker |
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Create a new collection in `PENDING` state.
    async fn create_collection(&self, new: &NewCollection) -> Result<Collection>;

    /// Attach a document to an existing collection, returning its id.
    async fn add_document(&self, collection_id: i64, doc: &NewDocument) -> Result<i64>;

    async fn get_collection(&self, id: i64) -> Result<Option<Collection>>;

    /// Documents of a collection, in insertion order.
    async fn list_documents(&self, collection_id: i64) -> Result<Vec<Document>>;

    /// Move a collection to `status`.
    ///
    /// Fails with a [`StatusTransitionError`](crate::error::StatusTransitionError)
    /// if the transition is not allowed from the current status, or if the
    /// collection does not exist.
    async fn update_status(&self, id: i64, status: CollectionStatus) -> Result<()>;

    async fn set_model(&self, id: i64, model: Option<&str>) -> Result<()>;
}
