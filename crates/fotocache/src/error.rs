//! Error types for fotocache

use thiserror::Error;

/// Errors reported by the remote source collaborator.
///
/// `AccessDenied` is an expected outcome (content not shared with the
/// caller), not a fault; the cache handles translate it to an empty result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The caller lacks permission for this query or document
    #[error("access denied")]
    AccessDenied,

    /// Network or server failure; the same request may succeed later
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the best-effort persistence medium.
///
/// These never propagate past the cache store; the in-memory cache stays
/// authoritative and the failure is logged.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Snapshot could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// I/O error from a file-backed medium
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Medium rejected the write (quota, unavailable slot)
    #[error("medium rejected write: {0}")]
    Medium(String),
}
