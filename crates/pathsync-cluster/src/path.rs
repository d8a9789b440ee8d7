//! Logical path identity for replicated resources.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one replicated resource cluster-wide: a sync directory plus a
/// path relative to it.
///
/// Equality is structural. The serialized key (`"<sync_dir>:<rel_path>"`)
/// names the distributed mutex for the path and correlates barrier responses.
/// The separator is not escaped, so a `:` inside `sync_dir` can collide with
/// another pair; the key format is kept as-is because deployed nodes match on
/// exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalPath {
    sync_dir: String,
    rel_path: String,
}

impl LogicalPath {
    /// Create a logical path from a sync directory and a relative path.
    pub fn new(sync_dir: impl Into<String>, rel_path: impl Into<String>) -> Self {
        Self {
            sync_dir: sync_dir.into(),
            rel_path: rel_path.into(),
        }
    }

    /// The sync directory component.
    pub fn sync_dir(&self) -> &str {
        &self.sync_dir
    }

    /// The path relative to the sync directory.
    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    /// The distributed-mutex key for this path.
    pub fn key(&self) -> String {
        format!("{}:{}", self.sync_dir, self.rel_path)
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sync_dir, self.rel_path)
    }
}
