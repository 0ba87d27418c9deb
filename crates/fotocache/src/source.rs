//! Collaborator contract for the remote document store
//!
//! The cache never talks to the network itself; it drives an implementation
//! of [`RemoteSource`] supplied by the application. Records are typed per
//! scope, validated at this boundary, so the cache's generic parameter is
//! the single source of type safety.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SourceError;
use crate::key::QueryDescriptor;

/// Address of a single document within a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    /// Remote collection holding the document
    pub collection: String,
    /// Document identifier
    pub id: String,
}

impl DocRef {
    /// Build a document reference
    pub fn new(collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

/// One push from a collection subscription
#[derive(Debug, Clone)]
pub enum CollectionEvent<T> {
    /// A full replacement snapshot of the query's result set
    Snapshot(Vec<T>),
    /// The subscription failed; the feed may keep delivering afterwards
    Error(SourceError),
}

/// One push from a document subscription
#[derive(Debug, Clone)]
pub enum DocumentEvent<T> {
    /// The document's current state; `None` when it does not exist
    Snapshot(Option<T>),
    /// The subscription failed; the feed may keep delivering afterwards
    Error(SourceError),
}

/// Remote document store the cache reads through
///
/// Subscriptions are push feeds delivered over a channel; dropping the
/// receiver unsubscribes (the source observes the closed channel on its
/// next send).
#[async_trait]
pub trait RemoteSource<T>: Send + Sync {
    /// Fetch all records matching the query
    async fn fetch_many(&self, query: &QueryDescriptor) -> Result<Vec<T>, SourceError>;

    /// Fetch one record; `Ok(None)` when the document does not exist
    async fn fetch_one(&self, doc: &DocRef) -> Result<Option<T>, SourceError>;

    /// Open a continuous feed of snapshots for the query
    fn subscribe_many(&self, query: &QueryDescriptor) -> mpsc::Receiver<CollectionEvent<T>>;

    /// Open a continuous feed of snapshots for one document
    fn subscribe_one(&self, doc: &DocRef) -> mpsc::Receiver<DocumentEvent<T>>;
}
