//! Error types for the cluster coordination protocol.

use crate::membership::MemberId;
use crate::path::LogicalPath;
use thiserror::Error;

/// Errors raised when publishing to the topic bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The message could not be encoded for the wire.
    #[error("failed to encode message for topic {topic}")]
    Encode {
        /// Topic the message was destined for.
        topic: String,
        /// Underlying codec error.
        #[source]
        source: bincode::Error,
    },
}

/// Outcome of a failed response barrier call.
///
/// Callers must handle the variants distinctly: a timeout is retryable, an
/// aggregated failure names every member that rejected the request, and a
/// cancellation means this node is shutting down.
#[derive(Debug, Error)]
pub enum BarrierError {
    /// Not every member resolved within the configured deadline.
    #[error("timed out after {waited_ms}ms on {topic} with {pending} member(s) still pending")]
    Timeout {
        /// Request topic the barrier published to.
        topic: String,
        /// Total time waited, in milliseconds.
        waited_ms: u64,
        /// Number of members that never resolved.
        pending: usize,
    },

    /// One or more members reported an explicit failure. Carries every
    /// failing member, not just the first.
    #[error("{} cluster member(s) reported failure", .failures.len())]
    Aggregated {
        /// Each failing member paired with its reported reason.
        failures: Vec<(MemberId, String)>,
    },

    /// The wait was cancelled by local shutdown.
    #[error("barrier wait cancelled by shutdown")]
    Cancelled,

    /// The request could not be published at all.
    #[error("failed to publish request to {topic}")]
    Publish {
        /// Topic the publish was aimed at.
        topic: String,
        /// Underlying bus error.
        #[source]
        source: BusError,
    },

    /// The ack subscription closed while the call was still waiting.
    #[error("ack topic {topic} closed during wait")]
    ChannelClosed {
        /// Ack topic that closed.
        topic: String,
    },
}

/// Errors raised by the local lock registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry has begun graceful shutdown and rejects new acquisitions.
    #[error("lock registry is shutting down, rejecting new acquisitions")]
    ShuttingDown,

    /// The wait for the distributed mutex was cancelled by local shutdown.
    #[error("distributed mutex wait cancelled by shutdown")]
    Cancelled,
}

/// Errors raised by [`GlobalLockManager::lock`](crate::lock_manager::GlobalLockManager::lock).
///
/// A plain wait-timeout on the distributed mutex is not an error; `lock`
/// reports it as `Ok(false)` after compensating.
#[derive(Debug, Error)]
pub enum LockError {
    /// The local distributed mutex step was aborted.
    #[error("local mutex acquisition failed for {path}")]
    Local {
        /// Path the lock was requested for.
        path: LogicalPath,
        /// Underlying registry error.
        #[source]
        source: RegistryError,
    },

    /// The remote lock broadcast failed after the local mutex was held; the
    /// mutex has been released by compensation before this is returned.
    #[error("cluster lock broadcast failed for {path}")]
    Broadcast {
        /// Path the lock was requested for.
        path: LogicalPath,
        /// Underlying barrier error.
        #[source]
        source: BarrierError,
    },
}

/// Error raised by [`GlobalLockManager::unlock`](crate::lock_manager::GlobalLockManager::unlock)
/// when the unlock broadcast fails. The local mutex has always been released
/// by the time this is returned.
#[derive(Debug, Error)]
#[error("cluster unlock broadcast failed for {path}")]
pub struct UnlockError {
    /// Path the unlock was requested for.
    pub path: LogicalPath,
    /// Underlying barrier error.
    #[source]
    pub source: BarrierError,
}

/// Errors raised by the replication request dispatcher, one variant per
/// broadcast operation, each preserving the barrier failure as its source.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The delete broadcast failed.
    #[error("delete broadcast failed for {path}")]
    Delete {
        /// Path the delete was requested for.
        path: LogicalPath,
        /// Underlying barrier error.
        #[source]
        source: BarrierError,
    },

    /// The transfer broadcast failed.
    #[error("transfer broadcast failed for {path}")]
    Transfer {
        /// Path the transfer was requested for.
        path: LogicalPath,
        /// Underlying barrier error.
        #[source]
        source: BarrierError,
    },

    /// The store broadcast failed.
    #[error("store broadcast failed for {path}")]
    Store {
        /// Path the store was requested for.
        path: LogicalPath,
        /// Underlying barrier error.
        #[source]
        source: BarrierError,
    },

    /// The discard broadcast failed.
    #[error("discard broadcast failed for {path}")]
    Discard {
        /// Path the discard was requested for.
        path: LogicalPath,
        /// Underlying barrier error.
        #[source]
        source: BarrierError,
    },
}

impl ReplicationError {
    /// The path the failed operation was addressed to.
    pub fn path(&self) -> &LogicalPath {
        match self {
            Self::Delete { path, .. }
            | Self::Transfer { path, .. }
            | Self::Store { path, .. }
            | Self::Discard { path, .. } => path,
        }
    }

    /// The underlying barrier failure.
    pub fn barrier_error(&self) -> &BarrierError {
        match self {
            Self::Delete { source, .. }
            | Self::Transfer { source, .. }
            | Self::Store { source, .. }
            | Self::Discard { source, .. } => source,
        }
    }
}

/// Error reported by a sync target when a local filesystem effect fails.
/// The message crosses the wire as the member's failure reason.
#[derive(Debug, Error)]
#[error("{msg}")]
pub struct SyncTargetError {
    /// Human-readable description of the local failure.
    pub msg: String,
}

impl SyncTargetError {
    /// Create a sync target error with the given message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregated_display_counts_members() {
        let err = BarrierError::Aggregated {
            failures: vec![
                (MemberId::random(), "disk full".to_string()),
                (MemberId::random(), "io error".to_string()),
            ],
        };
        assert_eq!(err.to_string(), "2 cluster member(s) reported failure");
    }

    #[test]
    fn test_lock_error_preserves_cause() {
        use std::error::Error as _;
        let err = LockError::Broadcast {
            path: LogicalPath::new("dir", "f"),
            source: BarrierError::Timeout {
                topic: "pathsync/lock".to_string(),
                waited_ms: 500,
                pending: 1,
            },
        };
        let cause = err.source().expect("cause must be preserved");
        assert!(cause.to_string().contains("timed out after 500ms"));
    }

    #[test]
    fn test_replication_error_accessors() {
        let err = ReplicationError::Store {
            path: LogicalPath::new("dir", "f"),
            source: BarrierError::Cancelled,
        };
        assert_eq!(err.path().key(), "dir:f");
        assert!(matches!(err.barrier_error(), BarrierError::Cancelled));
    }
}
