//! Collection query cache handle
//!
//! Orchestrates cache-first reads for multi-record queries: serve a cached
//! result immediately, optionally revalidate it in the background, or run a
//! continuous realtime subscription instead. Results are applied through a
//! generation counter so a slow, superseded fetch can never clobber a newer
//! one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::ScopeConfig;
use crate::error::SourceError;
use crate::key::QueryDescriptor;
use crate::source::{CollectionEvent, RemoteSource};
use crate::store::CacheStore;

/// Per-handle caching options
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Cache scope the handle reads and writes
    pub scope: String,
    /// User the cached data belongs to; part of every key
    pub user_id: Option<String>,
    /// Override of the scope's TTL, in milliseconds
    pub ttl_ms: Option<u64>,
    /// Subscribe to the source instead of one-shot fetching
    pub realtime: bool,
    /// Serve cached data immediately and refresh it in the background
    pub stale_while_revalidate: bool,
}

impl CacheOptions {
    /// Options for a scope with everything else off
    pub fn new(scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            user_id: None,
            ttl_ms: None,
            realtime: false,
            stale_while_revalidate: false,
        }
    }

    /// Key cached data by this user
    pub fn for_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Override the scope's TTL for this handle's writes
    pub fn ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    /// Use a realtime subscription instead of one-shot fetches
    pub fn realtime(mut self, on: bool) -> Self {
        self.realtime = on;
        self
    }

    /// Serve stale hits immediately while refreshing in the background
    pub fn stale_while_revalidate(mut self, on: bool) -> Self {
        self.stale_while_revalidate = on;
        self
    }
}

/// Observable state of one cached read
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<D> {
    /// Most recently applied result
    pub data: D,
    /// A foreground fetch is in flight
    pub loading: bool,
    /// Message of the last source failure, if any
    pub error: Option<String>,
    /// `data` came from cache and a background refresh is pending
    pub is_stale: bool,
}

impl<D: Default> QueryState<D> {
    pub(crate) fn idle() -> Self {
        Self {
            data: D::default(),
            loading: false,
            error: None,
            is_stale: false,
        }
    }
}

struct Inner<T> {
    store: Arc<CacheStore>,
    options: CacheOptions,
    state: watch::Sender<QueryState<Vec<T>>>,
    generation: AtomicU64,
    disposed: AtomicBool,
    source: Arc<dyn RemoteSource<T>>,
    query: Mutex<Option<QueryDescriptor>>,
    sub_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Inner<T> {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, token: u64) -> bool {
        !self.disposed.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == token
    }

    /// Apply a state change only while `token` is still the newest operation
    fn apply(&self, token: u64, f: impl FnOnce(&mut QueryState<Vec<T>>)) {
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

/// Cache-first handle for one multi-record query
///
/// Dropping the handle disposes it: the realtime subscription (if any) is
/// torn down and in-flight fetches can no longer mutate state.
pub struct CollectionCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> CollectionCache<T>
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
                query: Mutex::new(None),
                sub_task: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> QueryState<Vec<T>> {
        self.inner.state.borrow().clone()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<QueryState<Vec<T>>> {
        self.inner.state.subscribe()
    }

    /// Point the handle at a new query; `None` means nothing to fetch yet
    /// (e.g. the user is not authenticated)
    ///
    /// Tears down any previous subscription first, then runs the cache-first
    /// algorithm: realtime handles subscribe; otherwise a fresh cache hit is
    /// served immediately (optionally kicking off a background revalidation)
    /// and a miss is fetched in the foreground.
    pub async fn set_query(&self, query: Option<QueryDescriptor>) {
        let inner = &self.inner;
        self.teardown_subscription();
        let token = inner.next_generation();
        *inner.query.lock() = query.clone();

        let Some(query) = query else {
            inner.apply(token, |state| *state = QueryState::idle());
            return;
        };

        if inner.options.realtime {
            self.spawn_subscription(query, token);
            return;
        }

        let cached: Option<Vec<T>> = inner.store.get(
            &inner.options.scope,
            Some(&query),
            inner.options.user_id.as_deref(),
        );
        match cached {
            Some(values) => {
                let revalidate = inner.options.stale_while_revalidate;
                inner.apply(token, |state| {
                    state.data = values;
                    state.loading = false;
                    state.error = None;
                    state.is_stale = revalidate;
                });
                if revalidate {
                    self.spawn_revalidation(query, token);
                }
            }
            None => {
                inner.apply(token, |state| {
                    state.loading = true;
                    state.error = None;
                    state.is_stale = false;
                });
                Self::run_fetch(Arc::clone(inner), query, token).await;
            }
        }
    }

    /// Force a fetch from the source, bypassing the cache-hit shortcut, and
    /// rewrite the cache with the result
    pub async fn refetch(&self) {
        let query = self.inner.query.lock().clone();
        let Some(query) = query else {
            return;
        };
        let token = self.inner.next_generation();
        self.inner.apply(token, |state| {
            state.loading = true;
            state.is_stale = false;
        });
        Self::run_fetch(Arc::clone(&self.inner), query, token).await;
    }

    /// Remove this query's cache entry without touching in-memory state
    pub fn invalidate_cache(&self) {
        if let Some(query) = self.inner.query.lock().as_ref() {
            self.inner.store.invalidate(
                &self.inner.options.scope,
                Some(query),
                self.inner.options.user_id.as_deref(),
            );
        }
    }

    fn spawn_revalidation(&self, query: QueryDescriptor, token: u64) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            Self::run_fetch(inner, query, token).await;
        });
    }

    fn spawn_subscription(&self, query: QueryDescriptor, token: u64) {
        let inner = Arc::clone(&self.inner);
        inner.apply(token, |state| {
            state.loading = true;
            state.error = None;
            state.is_stale = false;
        });
        let mut rx = inner.source.subscribe_many(&query);
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !inner.is_current(token) {
                    break;
                }
                match event {
                    CollectionEvent::Snapshot(values) => {
                        // Seed the cache so a later cold, non-realtime load
                        // of this query starts from the last snapshot
                        inner.store.set(
                            &inner.options.scope,
                            &values,
                            inner.config_override(),
                            Some(&query),
                            inner.options.user_id.as_deref(),
                        );
                        inner.apply(token, |state| {
                            state.data = values;
                            state.loading = false;
                            state.error = None;
                            state.is_stale = false;
                        });
                    }
                    CollectionEvent::Error(SourceError::AccessDenied) => {
                        inner.apply(token, |state| {
                            state.data = Vec::new();
                            state.loading = false;
                            state.error = None;
                            state.is_stale = false;
                        });
                    }
                    CollectionEvent::Error(SourceError::Unavailable(message)) => {
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

    async fn run_fetch(inner: Arc<Inner<T>>, query: QueryDescriptor, token: u64) {
        match inner.source.fetch_many(&query).await {
            Ok(values) => {
                if !inner.is_current(token) {
                    debug!(token, scope = %inner.options.scope, "dropping superseded fetch result");
                    return;
                }
                inner.store.set(
                    &inner.options.scope,
                    &values,
                    inner.config_override(),
                    Some(&query),
                    inner.options.user_id.as_deref(),
                );
                inner.apply(token, |state| {
                    state.data = values;
                    state.loading = false;
                    state.error = None;
                    state.is_stale = false;
                });
            }
            Err(SourceError::AccessDenied) => {
                // Not shared with this caller; an empty result, not a fault
                inner.apply(token, |state| {
                    state.data = Vec::new();
                    state.loading = false;
                    state.error = None;
                    state.is_stale = false;
                });
            }
            Err(SourceError::Unavailable(message)) => {
                // Keep whatever data we had; a transient failure must not
                // destroy previously good cached data
                inner.apply(token, |state| {
                    state.loading = false;
                    state.error = Some(message);
                    state.is_stale = false;
                });
            }
        }
    }
}

impl<T> CollectionCache<T> {
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

impl<T> Drop for CollectionCache<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}
