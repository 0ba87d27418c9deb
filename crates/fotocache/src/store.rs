//! TTL cache store with per-scope capacity bounds and a persistent mirror
//!
//! Eviction is two-phase on every write: first an expiry sweep (correctness:
//! stale data must never surface), then per-scope capacity eviction of the
//! oldest-by-write-time entries (resource bound: many distinct query
//! fingerprints, e.g. pagination, must not grow without limit). Reads do not
//! protect an entry from eviction; only writes refresh its age.

use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{default_scope_configs, ScopeConfig};
use crate::key::{CacheKey, QueryDescriptor};
use crate::persist::{PersistMedium, PersistedEntry, PersistedState, SNAPSHOT_VERSION};
use crate::stats::CacheStats;

/// One cached value with its write time and expiry
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub value: serde_json::Value,
    pub written_at: u64,
    pub expires_at: u64,
}

/// Point-in-time store diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Resident entries across all scopes
    pub size: usize,
    /// Resident entries already past expiry, pending lazy removal
    pub expired_count: usize,
}

/// Shared read-through cache between the UI and the remote document store
///
/// One store instance is constructed by the application's composition root
/// and injected into every cache handle; tests build one store each.
pub struct CacheStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry, RandomState>>,
    configs: HashMap<String, ScopeConfig, RandomState>,
    clock: Arc<dyn Clock>,
    medium: Option<Arc<dyn PersistMedium>>,
    stats: CacheStats,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    /// Create a store with the photo client's default scope table, the
    /// system clock, and no persistence
    pub fn new() -> Self {
        let mut configs = HashMap::with_hasher(RandomState::new());
        for (scope, cfg) in default_scope_configs() {
            configs.insert(scope.to_string(), cfg);
        }

        Self {
            entries: RwLock::new(HashMap::with_hasher(RandomState::new())),
            configs,
            clock: Arc::new(SystemClock),
            medium: None,
            stats: CacheStats::new(),
        }
    }

    /// Replace the time source (set before `with_persistence` so rehydration
    /// filters expiry against the right clock)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register or override a scope's tuning
    pub fn with_scope(mut self, scope: &str, config: ScopeConfig) -> Self {
        self.configs.insert(scope.to_string(), config);
        self
    }

    /// Attach a persistence medium and rehydrate non-expired entries from it
    pub fn with_persistence(mut self, medium: Arc<dyn PersistMedium>) -> Self {
        self.medium = Some(medium);
        self.rehydrate();
        self
    }

    /// Tuning in effect for a scope (registered or the fallback default)
    pub fn config_for(&self, scope: &str) -> ScopeConfig {
        self.configs.get(scope).copied().unwrap_or_default()
    }

    /// Cache a query result
    ///
    /// Stores the value with a fresh write time, runs the expiry sweep and
    /// the scope's capacity eviction, then mirrors to the persistence medium
    /// if a persist-enabled scope was touched. A value that fails to
    /// serialize is skipped with a warning; this never fails the caller.
    pub fn set<T: Serialize>(
        &self,
        scope: &str,
        value: &T,
        config: Option<ScopeConfig>,
        query: Option<&QueryDescriptor>,
        user: Option<&str>,
    ) {
        self.set_by_key(CacheKey::query(scope, query, user), value, config);
    }

    /// Cache a single document by id
    pub fn set_doc<T: Serialize>(
        &self,
        scope: &str,
        id: &str,
        value: &T,
        config: Option<ScopeConfig>,
        user: Option<&str>,
    ) {
        self.set_by_key(CacheKey::document(scope, id, user), value, config);
    }

    /// Look up a query result; absent on miss, expiry, or decode mismatch
    ///
    /// Expired entries are removed on access. Never fails.
    pub fn get<T: DeserializeOwned>(
        &self,
        scope: &str,
        query: Option<&QueryDescriptor>,
        user: Option<&str>,
    ) -> Option<T> {
        self.get_by_key(&CacheKey::query(scope, query, user))
    }

    /// Look up a single document by id
    pub fn get_doc<T: DeserializeOwned>(
        &self,
        scope: &str,
        id: &str,
        user: Option<&str>,
    ) -> Option<T> {
        self.get_by_key(&CacheKey::document(scope, id, user))
    }

    /// Remove one query's entry, or every entry in the scope when `query`
    /// is `None` (all fingerprints, all users)
    pub fn invalidate(&self, scope: &str, query: Option<&QueryDescriptor>, user: Option<&str>) {
        let touched_persist = {
            let mut map = self.entries.write();
            match query {
                Some(q) => {
                    let key = CacheKey::query(scope, Some(q), user);
                    map.remove(&key).is_some() && self.scope_persists(scope)
                }
                None => {
                    let before = map.len();
                    map.retain(|k, _| k.scope != scope);
                    map.len() != before && self.scope_persists(scope)
                }
            }
        };
        if touched_persist {
            self.persist();
        }
    }

    /// Remove one document's entry
    pub fn invalidate_doc(&self, scope: &str, id: &str, user: Option<&str>) {
        let key = CacheKey::document(scope, id, user);
        let touched_persist = {
            let mut map = self.entries.write();
            map.remove(&key).is_some() && self.scope_persists(scope)
        };
        if touched_persist {
            self.persist();
        }
    }

    /// Remove every entry encoding the given user, across all scopes
    ///
    /// Called on sign-out so a following session cannot read the previous
    /// user's data out of the cache.
    pub fn invalidate_user(&self, user_id: &str) {
        let touched_persist = {
            let mut map = self.entries.write();
            let removed: Vec<CacheKey> = map
                .keys()
                .filter(|k| k.user.as_deref() == Some(user_id))
                .cloned()
                .collect();
            let mut touched = false;
            for key in removed {
                map.remove(&key);
                touched |= self.scope_persists(&key.scope);
            }
            touched
        };
        if touched_persist {
            self.persist();
        }
    }

    /// Drop everything, including the persisted snapshot
    pub fn clear(&self) {
        self.entries.write().clear();
        if let Some(medium) = &self.medium {
            match serde_json::to_string(&PersistedState::empty()) {
                Ok(blob) => {
                    if let Err(e) = medium.write_all(&blob) {
                        self.stats.record_persist_failure();
                        warn!(error = %e, "failed to clear persisted cache snapshot");
                    }
                }
                Err(e) => {
                    self.stats.record_persist_failure();
                    warn!(error = %e, "failed to encode empty cache snapshot");
                }
            }
        }
    }

    /// Point-in-time diagnostics
    pub fn stats(&self) -> StoreStats {
        let now = self.clock.now_ms();
        let map = self.entries.read();
        StoreStats {
            size: map.len(),
            expired_count: map.values().filter(|e| now >= e.expires_at).count(),
        }
    }

    /// Cumulative behavior counters
    pub fn counters(&self) -> &CacheStats {
        &self.stats
    }

    /// Resident entries across all scopes
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn scope_persists(&self, scope: &str) -> bool {
        self.config_for(scope).persist
    }

    fn set_by_key<T: Serialize>(&self, key: CacheKey, value: &T, config: Option<ScopeConfig>) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(scope = %key.scope, error = %e, "value not serializable, skipping cache write");
                return;
            }
        };

        let cfg = config.unwrap_or_else(|| self.config_for(&key.scope));
        let now = self.clock.now_ms();
        let mut touched_persist = cfg.persist;
        {
            let mut map = self.entries.write();
            map.insert(
                key.clone(),
                CacheEntry {
                    value,
                    written_at: now,
                    expires_at: now.saturating_add(cfg.ttl_ms),
                },
            );
            self.stats.record_insert();

            for removed in Self::sweep_expired(&mut map, now, &self.stats) {
                touched_persist |= self.scope_persists(&removed.scope);
            }
            for removed in
                Self::evict_over_capacity(&mut map, &key.scope, cfg.max_entries, &self.stats)
            {
                touched_persist |= self.scope_persists(&removed.scope);
            }
        }
        if touched_persist {
            self.persist();
        }
    }

    fn get_by_key<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let now = self.clock.now_ms();
        let value = {
            let mut map = self.entries.write();
            match map.get(key) {
                Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
                Some(_) => {
                    map.remove(key);
                    self.stats.record_expiration();
                    None
                }
                None => None,
            }
        };

        let Some(value) = value else {
            self.stats.record_miss();
            return None;
        };

        match serde_json::from_value(value) {
            Ok(decoded) => {
                self.stats.record_hit();
                Some(decoded)
            }
            Err(e) => {
                warn!(scope = %key.scope, error = %e, "cached value failed to decode, dropping entry");
                self.entries.write().remove(key);
                self.stats.record_miss();
                None
            }
        }
    }

    /// Phase one: drop everything already past expiry, store-wide
    fn sweep_expired(
        map: &mut HashMap<CacheKey, CacheEntry, RandomState>,
        now: u64,
        stats: &CacheStats,
    ) -> Vec<CacheKey> {
        let expired: Vec<CacheKey> = map
            .iter()
            .filter(|(_, e)| now >= e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            map.remove(key);
            stats.record_expiration();
        }
        expired
    }

    /// Phase two: bound the scope's resident count, oldest writes first
    fn evict_over_capacity(
        map: &mut HashMap<CacheKey, CacheEntry, RandomState>,
        scope: &str,
        max_entries: usize,
        stats: &CacheStats,
    ) -> Vec<CacheKey> {
        let mut in_scope: Vec<(CacheKey, u64)> = map
            .iter()
            .filter(|(k, _)| k.scope == scope)
            .map(|(k, e)| (k.clone(), e.written_at))
            .collect();
        if in_scope.len() <= max_entries {
            return Vec::new();
        }

        in_scope.sort_by_key(|(_, written_at)| *written_at);
        let excess = in_scope.len() - max_entries;
        let mut removed = Vec::with_capacity(excess);
        for (key, _) in in_scope.into_iter().take(excess) {
            map.remove(&key);
            stats.record_eviction();
            removed.push(key);
        }
        removed
    }

    /// Mirror persist-enabled scopes to the medium's single slot
    fn persist(&self) {
        let Some(medium) = &self.medium else {
            return;
        };

        let state = {
            let map = self.entries.read();
            PersistedState {
                version: SNAPSHOT_VERSION,
                entries: map
                    .iter()
                    .filter(|(k, _)| self.scope_persists(&k.scope))
                    .map(|(k, e)| PersistedEntry {
                        scope: k.scope.clone(),
                        user: k.user.clone(),
                        fingerprint: k.fingerprint.clone(),
                        value: e.value.clone(),
                        written_at: e.written_at,
                        expires_at: e.expires_at,
                    })
                    .collect(),
            }
        };

        let blob = match serde_json::to_string(&state) {
            Ok(blob) => blob,
            Err(e) => {
                self.stats.record_persist_failure();
                warn!(error = %e, "failed to encode cache snapshot");
                return;
            }
        };
        if let Err(e) = medium.write_all(&blob) {
            self.stats.record_persist_failure();
            warn!(error = %e, "failed to write cache snapshot");
        }
    }

    /// Load the persisted snapshot, keeping only non-expired entries
    fn rehydrate(&mut self) {
        let Some(medium) = &self.medium else {
            return;
        };

        let blob = match medium.read_all() {
            Ok(Some(blob)) => blob,
            Ok(None) => return,
            Err(e) => {
                self.stats.record_persist_failure();
                warn!(error = %e, "failed to read persisted cache snapshot");
                return;
            }
        };

        let state: PersistedState = match serde_json::from_str(&blob) {
            Ok(state) => state,
            Err(e) => {
                self.stats.record_persist_failure();
                warn!(error = %e, "persisted cache snapshot is corrupt, ignoring");
                return;
            }
        };
        if state.version != SNAPSHOT_VERSION {
            warn!(
                version = state.version,
                "persisted cache snapshot has unknown version, ignoring"
            );
            return;
        }

        let now = self.clock.now_ms();
        let mut kept = 0usize;
        let mut dropped = 0usize;
        let map = self.entries.get_mut();
        for entry in state.entries {
            if entry.expires_at > now {
                map.insert(
                    CacheKey {
                        scope: entry.scope,
                        user: entry.user,
                        fingerprint: entry.fingerprint,
                    },
                    CacheEntry {
                        value: entry.value,
                        written_at: entry.written_at,
                        expires_at: entry.expires_at,
                    },
                );
                kept += 1;
            } else {
                dropped += 1;
            }
        }
        info!(kept, dropped, "rehydrated cache from persisted snapshot");
    }
}
