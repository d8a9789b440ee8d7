//! Replication request dispatcher.
//!
//! Broadcasts delete/transfer/store/discard for an already-locked path and
//! collects per-node acknowledgement through the response barrier. Callers
//! own the lock/unlock bracketing; by convention a path moves
//! `UNLOCKED → LOCKED → {TRANSFERRING →}* {STORED | DISCARDED} → UNLOCKED`,
//! with `delete` usable directly from `LOCKED`.

use crate::barrier::ResponseBarrier;
use crate::checksum::ChecksumTable;
use crate::config::SharedConfig;
use crate::error::{BarrierError, ReplicationError};
use crate::membership::MemberId;
use crate::message::{Request, RequestBody};
use crate::path::LogicalPath;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Broadcasts replication operations for locked paths.
#[derive(Debug)]
pub struct ReplicationDispatcher {
    local: MemberId,
    barrier: Arc<ResponseBarrier>,
    config: SharedConfig,
    checksums: Arc<ChecksumTable>,
}

impl ReplicationDispatcher {
    /// Create a dispatcher for the given node.
    pub fn new(
        local: MemberId,
        barrier: Arc<ResponseBarrier>,
        config: SharedConfig,
        checksums: Arc<ChecksumTable>,
    ) -> Self {
        Self {
            local,
            barrier,
            config,
            checksums,
        }
    }

    /// Delete `path` on every node.
    pub async fn delete(&self, path: &LogicalPath) -> Result<(), ReplicationError> {
        self.broadcast(path, RequestBody::Delete)
            .await
            .map_err(|source| ReplicationError::Delete {
                path: path.clone(),
                source,
            })?;
        self.checksums.remove(path);
        Ok(())
    }

    /// Stream a chunk of change bytes for `path` to every node.
    pub async fn transfer(
        &self,
        path: &LogicalPath,
        bytes: Bytes,
    ) -> Result<(), ReplicationError> {
        debug!(path = %path, len = bytes.len(), "broadcasting transfer chunk");
        self.broadcast(
            path,
            RequestBody::Transfer {
                bytes: bytes.to_vec(),
            },
        )
        .await
        .map_err(|source| ReplicationError::Transfer {
            path: path.clone(),
            source,
        })
    }

    /// Commit the streamed bytes for `path` on every node. The checksum side
    /// table is updated only after every member has acked the commit.
    pub async fn store(
        &self,
        path: &LogicalPath,
        checksum: Vec<u8>,
    ) -> Result<(), ReplicationError> {
        self.broadcast(
            path,
            RequestBody::Store {
                checksum: checksum.clone(),
            },
        )
        .await
        .map_err(|source| ReplicationError::Store {
            path: path.clone(),
            source,
        })?;
        self.checksums.put(path.clone(), checksum);
        Ok(())
    }

    /// Drop the streamed bytes for `path` on every node, carrying the reason
    /// the change was abandoned.
    pub async fn discard(
        &self,
        path: &LogicalPath,
        reason: impl Into<String>,
    ) -> Result<(), ReplicationError> {
        self.broadcast(
            path,
            RequestBody::Discard {
                reason: reason.into(),
            },
        )
        .await
        .map_err(|source| ReplicationError::Discard {
            path: path.clone(),
            source,
        })
    }

    async fn broadcast(
        &self,
        path: &LogicalPath,
        body: RequestBody,
    ) -> Result<(), BarrierError> {
        let timeout = self.config.current().response_timeout();
        let request = Request::new(self.local, path.clone(), body);
        self.barrier.await_acks(&request, timeout).await
    }
}
