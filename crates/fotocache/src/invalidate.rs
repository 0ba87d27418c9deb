//! Maps application mutations to cache purges
//!
//! Every mutation path calls [`Invalidator::invalidate_for_action`]
//! immediately after the remote store acknowledges the write — never
//! before, or a concurrent reader could refetch pre-mutation state and
//! repopulate the cache with it.

use std::sync::Arc;

use tracing::debug;

use crate::config::scopes;
use crate::store::CacheStore;

/// Semantic mutation performed elsewhere in the app
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    /// A photo was uploaded
    PhotoUpload,
    /// A photo was deleted
    PhotoDelete,
    /// A photo's metadata changed
    PhotoUpdate,
    /// An album was created
    AlbumCreate,
    /// An album's metadata changed
    AlbumUpdate,
    /// An album was deleted
    AlbumDelete,
    /// The user signed out
    UserLogout,
}

impl MutationAction {
    /// Scopes purged by this action; empty for logout, which purges by user
    pub fn scopes(&self) -> &'static [&'static str] {
        match self {
            MutationAction::PhotoUpload
            | MutationAction::PhotoDelete
            | MutationAction::PhotoUpdate => &[scopes::PHOTOS, scopes::RECENT],
            MutationAction::AlbumCreate
            | MutationAction::AlbumUpdate
            | MutationAction::AlbumDelete => &[scopes::ALBUMS],
            MutationAction::UserLogout => &[],
        }
    }
}

/// Purges cache scopes after acknowledged mutations
pub struct Invalidator {
    store: Arc<CacheStore>,
}

impl Invalidator {
    /// Build an invalidator over the shared store
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Purge everything the action made stale; fire-and-forget
    pub fn invalidate_for_action(&self, action: MutationAction, user_id: &str) {
        match action {
            MutationAction::UserLogout => self.store.invalidate_user(user_id),
            _ => {
                for scope in action.scopes() {
                    self.store.invalidate(scope, None, None);
                }
            }
        }
        debug!(?action, user_id, "invalidated cache scopes");
    }
}
