//! # fotocache
//!
//! Read-through cache between the Fotofam photo client and its remote
//! document store.
//!
//! ## Architecture
//! - **CacheStore**: TTL expiration, per-scope capacity bounds with
//!   oldest-write-first eviction, optional persistent mirror
//! - **CollectionCache / DocumentCache**: cache-first loads,
//!   stale-while-revalidate refresh, realtime subscription feeds,
//!   generation-guarded result application
//! - **Invalidator**: maps app mutations to the scopes they stale
//!
//! The store is constructed once at the application's composition root and
//! injected into every handle. The remote store and the persistence medium
//! are collaborator traits ([`RemoteSource`], [`PersistMedium`]) supplied by
//! the application.

#![warn(missing_docs)]

mod clock;
mod collection;
mod config;
mod document;
mod error;
mod invalidate;
mod key;
mod persist;
mod source;
mod stats;
mod store;

#[cfg(test)]
mod testutil;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collection::{CacheOptions, CollectionCache, QueryState};
pub use config::{default_scope_configs, scopes, ScopeConfig};
pub use document::DocumentCache;
pub use error::{PersistError, SourceError};
pub use invalidate::{Invalidator, MutationAction};
pub use key::{FieldFilter, FilterOp, OrderBy, QueryDescriptor};
pub use persist::{JsonFileStore, PersistMedium};
pub use source::{CollectionEvent, DocRef, DocumentEvent, RemoteSource};
pub use stats::CacheStats;
pub use store::{CacheStore, StoreStats};
