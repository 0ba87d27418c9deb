//! Test doubles shared by the cache handle tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use crate::collection::QueryState;
use crate::error::SourceError;
use crate::key::QueryDescriptor;
use crate::source::{CollectionEvent, DocRef, DocumentEvent, RemoteSource};

/// Minimal record type for handle tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Photo {
    pub id: String,
}

impl Photo {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

type Scripted<R> = (R, Option<oneshot::Receiver<()>>);

/// Remote source with scripted responses
///
/// Responses are consumed in push order. A gated response parks the fetch
/// until the returned sender fires, which lets tests interleave slow and
/// fast operations deterministically. Subscriptions hand the test the
/// sending half of the feed.
pub(crate) struct MockSource {
    many: Mutex<VecDeque<Scripted<Result<Vec<Photo>, SourceError>>>>,
    one: Mutex<VecDeque<Scripted<Result<Option<Photo>, SourceError>>>>,
    many_calls: AtomicU64,
    one_calls: AtomicU64,
    collection_feeds: Mutex<Vec<mpsc::Sender<CollectionEvent<Photo>>>>,
    document_feeds: Mutex<Vec<mpsc::Sender<DocumentEvent<Photo>>>>,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            many: Mutex::new(VecDeque::new()),
            one: Mutex::new(VecDeque::new()),
            many_calls: AtomicU64::new(0),
            one_calls: AtomicU64::new(0),
            collection_feeds: Mutex::new(Vec::new()),
            document_feeds: Mutex::new(Vec::new()),
        })
    }

    pub fn push_many(&self, result: Result<Vec<Photo>, SourceError>) {
        self.many.lock().push_back((result, None));
    }

    pub fn push_many_gated(&self, result: Result<Vec<Photo>, SourceError>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.many.lock().push_back((result, Some(rx)));
        tx
    }

    pub fn push_one(&self, result: Result<Option<Photo>, SourceError>) {
        self.one.lock().push_back((result, None));
    }

    pub fn push_one_gated(&self, result: Result<Option<Photo>, SourceError>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.one.lock().push_back((result, Some(rx)));
        tx
    }

    pub fn many_calls(&self) -> u64 {
        self.many_calls.load(Ordering::SeqCst)
    }

    pub fn one_calls(&self) -> u64 {
        self.one_calls.load(Ordering::SeqCst)
    }

    /// Sending half of the most recently opened collection feed
    pub fn collection_feed(&self) -> mpsc::Sender<CollectionEvent<Photo>> {
        self.collection_feeds
            .lock()
            .last()
            .expect("no collection subscription opened")
            .clone()
    }

    /// Sending half of the most recently opened document feed
    pub fn document_feed(&self) -> mpsc::Sender<DocumentEvent<Photo>> {
        self.document_feeds
            .lock()
            .last()
            .expect("no document subscription opened")
            .clone()
    }
}

#[async_trait]
impl RemoteSource<Photo> for MockSource {
    async fn fetch_many(&self, _query: &QueryDescriptor) -> Result<Vec<Photo>, SourceError> {
        self.many_calls.fetch_add(1, Ordering::SeqCst);
        let (result, gate) = self
            .many
            .lock()
            .pop_front()
            .unwrap_or((Err(SourceError::Unavailable("no scripted response".to_string())), None));
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        result
    }

    async fn fetch_one(&self, _doc: &DocRef) -> Result<Option<Photo>, SourceError> {
        self.one_calls.fetch_add(1, Ordering::SeqCst);
        let (result, gate) = self
            .one
            .lock()
            .pop_front()
            .unwrap_or((Err(SourceError::Unavailable("no scripted response".to_string())), None));
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        result
    }

    fn subscribe_many(&self, _query: &QueryDescriptor) -> mpsc::Receiver<CollectionEvent<Photo>> {
        let (tx, rx) = mpsc::channel(8);
        self.collection_feeds.lock().push(tx);
        rx
    }

    fn subscribe_one(&self, _doc: &DocRef) -> mpsc::Receiver<DocumentEvent<Photo>> {
        let (tx, rx) = mpsc::channel(8);
        self.document_feeds.lock().push(tx);
        rx
    }
}

/// Wait until the watched state satisfies the predicate, or panic after 1s
pub(crate) async fn wait_for<D, F>(
    rx: &mut watch::Receiver<QueryState<D>>,
    mut pred: F,
) -> QueryState<D>
where
    D: Clone,
    F: FnMut(&QueryState<D>) -> bool,
{
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if pred(&rx.borrow()) {
                break;
            }
            rx.changed().await.expect("state channel closed");
        }
        rx.borrow().clone()
    })
    .await
    .expect("state did not converge in time")
}
