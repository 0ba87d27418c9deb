//! Per-scope cache tuning
//!
//! Scopes have independently tunable TTL and capacity because their churn
//! differs: a photo list changes far more often than a user profile.

/// Tuning for one cache scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeConfig {
    /// How long an entry stays servable, in milliseconds
    pub ttl_ms: u64,
    /// Maximum resident entries for the scope
    pub max_entries: usize,
    /// Mirror this scope's entries to the persistence medium
    pub persist: bool,
}

impl ScopeConfig {
    /// Build a scope config
    pub const fn new(ttl_ms: u64, max_entries: usize, persist: bool) -> Self {
        Self {
            ttl_ms,
            max_entries,
            persist,
        }
    }
}

impl Default for ScopeConfig {
    fn default() -> Self {
        // Fallback for scopes registered on the fly: 5 minutes, in-memory only
        Self::new(5 * 60_000, 25, false)
    }
}

/// Scope names used by the photo client
pub mod scopes {
    /// Photo lists (per-album, per-owner queries)
    pub const PHOTOS: &str = "photos";
    /// The "recently uploaded" strip on the home screen
    pub const RECENT: &str = "recent";
    /// Album lists and single albums
    pub const ALBUMS: &str = "albums";
    /// User profiles
    pub const USERS: &str = "users";
}

/// Default tuning table for the photo client's scopes
pub fn default_scope_configs() -> Vec<(&'static str, ScopeConfig)> {
    vec![
        (scopes::PHOTOS, ScopeConfig::new(2 * 60_000, 40, true)),
        (scopes::RECENT, ScopeConfig::new(60_000, 10, true)),
        (scopes::ALBUMS, ScopeConfig::new(15 * 60_000, 20, true)),
        (scopes::USERS, ScopeConfig::new(30 * 60_000, 20, false)),
    ]
}
