//! Single-document cache handle
//!
//! Same orchestration as [`crate::collection::CollectionCache`] specialized
//! to zero-or-one record addressed by id. A document that does not exist is
//! a successful result (`data == None`), not an error, and the absence is
//! cached like any other value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::collection::{CacheOptions, QueryState};
use crate::config::ScopeConfig;
use crate::error::SourceError;
use crate::source::{DocRef, DocumentEvent, RemoteSource};
use crate::store::CacheStore;

struct Inner<T> {
    store: Arc<CacheStore>,
    source: Arc<dyn RemoteSource<T>>,
    options: CacheOptions,
    state: watch::Sender<QueryState<Option<T>>>,
    generation: AtomicU64,
    disposed: AtomicBool,
    doc: Mutex<Option<DocRef>>,
    sub_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Inner<T> {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, token: u64) -> bool {
        !self.disposed.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == token
    }

    fn apply(&self, token: u64, f: impl FnOnce(&mut QueryState<Option<T>>)) {
        let mut applied = false;
        self.state.send_modify(|state| {
            if self.is_current(token) {
                f(state);
                applied = true;
            }
        });
        if !applied {
            debug!(token, scope = %self.options.scope, "dropping superseded result");
        }
    }

    fn config_override(&self) -> Option<ScopeConfig> {
        self.options.ttl_ms.map(|ttl_ms| {
            let mut cfg = self.store.config_for(&self.options.scope);
            cfg.ttl_ms = ttl_ms;
            cfg
        })
    }
}

/// Cache-first handle for one document
///
/// Dropping the handle disposes it, like the collection handle.
pub struct DocumentCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> DocumentCache<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Create a handle over a shared store and source
    pub fn new(
        store: Arc<CacheStore>,
        source: Arc<dyn RemoteSource<T>>,
        options: CacheOptions,
    ) -> Self {
        let (state, _) = watch::channel(QueryState::idle());
        Self {
            inner: Arc::new(Inner {
                store,
                source,
                options,
                state,
                generation: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                doc: Mutex::new(None),
                sub_task: Mutex::new(None),
            }),
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> QueryState<Option<T>> {
        self.inner.state.borrow().clone()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<QueryState<Option<T>>> {
        self.inner.state.subscribe()
    }

    /// Point the handle at a document; `None` means nothing to fetch yet
    pub async fn set_doc_ref(&self, doc: Option<DocRef>) {
        let inner = &self.inner;
        self.teardown_subscription();
        let token = inner.next_generation();
        *inner.doc.lock() = doc.clone();

        let Some(doc) = doc else {
            inner.apply(token, |state| *state = QueryState::idle());
            return;
        };

        if inner.options.realtime {
            self.spawn_subscription(doc, token);
            return;
        }

        let cached: Option<Option<T>> = inner.store.get_doc(
            &inner.options.scope,
            &doc.id,
            inner.options.user_id.as_deref(),
        );
        match cached {
            Some(value) => {
                let revalidate = inner.options.stale_while_revalidate;
                inner.apply(token, |state| {
                    state.data = value;
                    state.loading = false;
                    state.error = None;
                    state.is_stale = revalidate;
                });
                if revalidate {
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        Self::run_fetch(inner, doc, token).await;
                    });
                }
            }
            None => {
                inner.apply(token, |state| {
                    state.loading = true;
                    state.error = None;
                    state.is_stale = false;
                });
                Self::run_fetch(Arc::clone(inner), doc, token).await;
            }
        }
    }

    /// Force a fetch from the source and rewrite the cache with the result
    pub async fn refetch(&self) {
        let doc = self.inner.doc.lock().clone();
        let Some(doc) = doc else {
            return;
        };
        let token = self.inner.next_generation();
        self.inner.apply(token, |state| {
            state.loading = true;
            state.is_stale = false;
        });
        Self::run_fetch(Arc::clone(&self.inner), doc, token).await;
    }

    /// Remove this document's cache entry without touching in-memory state
    pub fn invalidate_cache(&self) {
        if let Some(doc) = self.inner.doc.lock().as_ref() {
            self.inner.store.invalidate_doc(
                &self.inner.options.scope,
                &doc.id,
                self.inner.options.user_id.as_deref(),
            );
        }
    }

    fn spawn_subscription(&self, doc: DocRef, token: u64) {
        let inner = Arc::clone(&self.inner);
        inner.apply(token, |state| {
            state.loading = true;
            state.error = None;
            state.is_stale = false;
        });
        let mut rx = inner.source.subscribe_one(&doc);
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !inner.is_current(token) {
                    break;
                }
                match event {
                    DocumentEvent::Snapshot(value) => {
                        inner.store.set_doc(
                            &inner.options.scope,
                            &doc.id,
                            &value,
                            inner.config_override(),
                            inner.options.user_id.as_deref(),
                        );
                        inner.apply(token, |state| {
                            state.data = value;
                            state.loading = false;
                            state.error = None;
                            state.is_stale = false;
                        });
                    }
                    DocumentEvent::Error(SourceError::AccessDenied) => {
                        inner.apply(token, |state| {
                            state.data = None;
                            state.loading = false;
                            state.error = None;
                            state.is_stale = false;
                        });
                    }
                    DocumentEvent::Error(SourceError::Unavailable(message)) => {
                        inner.apply(token, |state| {
                            state.loading = false;
                            state.error = Some(message);
                            state.is_stale = false;
                        });
                    }
                }
            }
        });
        *self.inner.sub_task.lock() = Some(task);
    }

    async fn run_fetch(inner: Arc<Inner<T>>, doc: DocRef, token: u64) {
        match inner.source.fetch_one(&doc).await {
            Ok(value) => {
                if !inner.is_current(token) {
                    debug!(token, scope = %inner.options.scope, "dropping superseded fetch result");
                    return;
                }
                // Absence is cached too, so a known-missing document does
                // not refetch on every load
                inner.store.set_doc(
                    &inner.options.scope,
                    &doc.id,
                    &value,
                    inner.config_override(),
                    inner.options.user_id.as_deref(),
                );
                inner.apply(token, |state| {
                    state.data = value;
                    state.loading = false;
                    state.error = None;
                    state.is_stale = false;
                });
            }
            Err(SourceError::AccessDenied) => {
                inner.apply(token, |state| {
                    state.data = None;
                    state.loading = false;
                    state.error = None;
                    state.is_stale = false;
                });
            }
            Err(SourceError::Unavailable(message)) => {
                inner.apply(token, |state| {
                    state.loading = false;
                    state.error = Some(message);
                    state.is_stale = false;
                });
            }
        }
    }
}

impl<T> DocumentCache<T> {
    /// Stop applying results and tear down any subscription
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.teardown_subscription();
    }

    fn teardown_subscription(&self) {
        if let Some(task) = self.inner.sub_task.lock().take() {
            task.abort();
        }
    }
}

impl<T> Drop for DocumentCache<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{wait_for, MockSource, Photo};

    fn options() -> CacheOptions {
        CacheOptions::new("albums").for_user("u1")
    }

    fn doc() -> DocRef {
        DocRef::new("albums", "a1")
    }

    #[tokio::test]
    async fn test_miss_fetches_and_seeds_cache() {
        let store = Arc::new(CacheStore::new());
        let source = MockSource::new();
        source.push_one(Ok(Some(Photo::new("a1"))));
        let handle = DocumentCache::new(store.clone(), source, options());

        handle.set_doc_ref(Some(doc())).await;

        let state = handle.state();
        assert_eq!(state.data, Some(Photo::new("a1")));
        assert!(!state.loading);
        assert_eq!(state.error, None);

        let cached: Option<Option<Photo>> = store.get_doc("albums", "a1", Some("u1"));
        assert_eq!(cached, Some(Some(Photo::new("a1"))));
    }

    #[tokio::test]
    async fn test_missing_document_is_success_and_cached() {
        let store = Arc::new(CacheStore::new());
        let source = MockSource::new();
        source.push_one(Ok(None));
        let handle = DocumentCache::new(store.clone(), source.clone(), options());

        handle.set_doc_ref(Some(doc())).await;

        let state = handle.state();
        assert_eq!(state.data, None);
        assert_eq!(state.error, None);
        assert!(!state.loading);
        assert_eq!(source.one_calls(), 1);

        // The absence was cached; re-targeting the same doc does not refetch
        handle.set_doc_ref(Some(doc())).await;
        assert_eq!(source.one_calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_on_document() {
        let store = Arc::new(CacheStore::new());
        store.set_doc("albums", "a1", &Some(Photo::new("old")), None, Some("u1"));
        let source = MockSource::new();
        let gate = source.push_one_gated(Ok(Some(Photo::new("new"))));
        let handle = DocumentCache::new(
            store,
            source,
            options().stale_while_revalidate(true),
        );
        let mut watcher = handle.watch_state();

        handle.set_doc_ref(Some(doc())).await;

        let state = handle.state();
        assert_eq!(state.data, Some(Photo::new("old")));
        assert!(!state.loading);
        assert!(state.is_stale);

        gate.send(()).unwrap();
        let state = wait_for(&mut watcher, |s| !s.is_stale).await;
        assert_eq!(state.data, Some(Photo::new("new")));
    }

    #[tokio::test]
    async fn test_access_denied_clears_document() {
        let store = Arc::new(CacheStore::new());
        let source = MockSource::new();
        source.push_one(Err(SourceError::AccessDenied));
        let handle = DocumentCache::new(store, source, options());

        handle.set_doc_ref(Some(doc())).await;

        let state = handle.state();
        assert_eq!(state.data, None);
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn test_realtime_document_feed() {
        let store = Arc::new(CacheStore::new());
        let source = MockSource::new();
        let handle = DocumentCache::new(store.clone(), source.clone(), options().realtime(true));
        let mut watcher = handle.watch_state();

        handle.set_doc_ref(Some(doc())).await;
        assert!(handle.state().loading);

        let feed = source.document_feed();
        feed.send(DocumentEvent::Snapshot(Some(Photo::new("a1"))))
            .await
            .unwrap();
        let state = wait_for(&mut watcher, |s| !s.loading).await;
        assert_eq!(state.data, Some(Photo::new("a1")));

        // Deletion arrives as an empty snapshot
        feed.send(DocumentEvent::Snapshot(None)).await.unwrap();
        let state = wait_for(&mut watcher, |s| s.data.is_none()).await;
        assert_eq!(state.data, None);
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn test_failure_preserves_document() {
        let store = Arc::new(CacheStore::new());
        let source = MockSource::new();
        source.push_one(Ok(Some(Photo::new("a1"))));
        source.push_one(Err(SourceError::Unavailable("offline".to_string())));
        let handle = DocumentCache::new(store, source, options());

        handle.set_doc_ref(Some(doc())).await;
        handle.refetch().await;

        let state = handle.state();
        assert_eq!(state.data, Some(Photo::new("a1")));
        assert_eq!(state.error.as_deref(), Some("offline"));
    }
}
