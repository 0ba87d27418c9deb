//! Persistent mirror for the cache store
//!
//! The medium is a single global slot (browser local storage, a file on
//! native clients). It is best-effort acceleration, not durability: every
//! failure is logged and swallowed, and the in-memory cache stays
//! authoritative.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PersistError;

/// Schema version of the persisted snapshot
pub(crate) const SNAPSHOT_VERSION: u32 = 1;

/// Single-slot persistence medium
pub trait PersistMedium: Send + Sync {
    /// Read the whole slot; `None` when nothing was persisted yet
    fn read_all(&self) -> Result<Option<String>, PersistError>;

    /// Overwrite the whole slot
    fn write_all(&self, blob: &str) -> Result<(), PersistError>;
}

/// One persisted cache entry
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PersistedEntry {
    pub scope: String,
    pub user: Option<String>,
    pub fingerprint: String,
    pub value: serde_json::Value,
    pub written_at: u64,
    pub expires_at: u64,
}

/// Snapshot written to the medium's slot
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PersistedState {
    pub version: u32,
    pub entries: Vec<PersistedEntry>,
}

impl PersistedState {
    pub(crate) fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            entries: Vec::new(),
        }
    }
}

/// File-backed medium for native clients and tests
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a medium writing to the given file path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PersistMedium for JsonFileStore {
    fn read_all(&self) -> Result<Option<String>, PersistError> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&self.path)?))
    }

    fn write_all(&self, blob: &str) -> Result<(), PersistError> {
        fs::write(&self.path, blob)?;
        Ok(())
    }
}
