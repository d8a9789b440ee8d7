//! Checksum side table for stored changes.
//!
//! Keyed by [`LogicalPath`], written only after a store has committed. The
//! origin records a digest once every member acked the store; responders
//! record it when they commit locally.

use crate::path::LogicalPath;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// SHA-256 digest of `bytes`, the format carried in store requests.
pub fn digest(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

/// Per-node table mapping logical paths to the digest of their last
/// successfully stored contents.
#[derive(Debug, Default)]
pub struct ChecksumTable {
    entries: DashMap<LogicalPath, Vec<u8>>,
}

impl ChecksumTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The digest recorded for `path`, or an empty digest if the path was
    /// never stored.
    pub fn get(&self, path: &LogicalPath) -> Vec<u8> {
        self.entries
            .get(path)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Record `checksum` for `path`, replacing any previous digest.
    pub fn put(&self, path: LogicalPath, checksum: Vec<u8>) {
        self.entries.insert(path, checksum);
    }

    /// Drop the digest for `path` (e.g. after a delete).
    pub fn remove(&self, path: &LogicalPath) {
        self.entries.remove(path);
    }

    /// Number of recorded digests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no digests are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
