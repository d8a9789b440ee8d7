//! Global lock orchestration for logical paths.
//!
//! Ordering is deliberate: the local distributed mutex is taken before the
//! remote per-node lock broadcast, so a partial failure leaves at most "this
//! node holds the mutex" to undo. Every failure path runs the compensating
//! rollback before the error is surfaced — callers never clean up after a
//! failed `lock`.

use crate::barrier::ResponseBarrier;
use crate::config::SharedConfig;
use crate::error::{LockError, UnlockError};
use crate::membership::MemberId;
use crate::message::{Request, RequestBody};
use crate::path::LogicalPath;
use crate::registry::LocalLockRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Acquires and releases the cluster-wide exclusive lock for logical paths.
#[derive(Debug)]
pub struct GlobalLockManager {
    local: MemberId,
    registry: Arc<LocalLockRegistry>,
    barrier: Arc<ResponseBarrier>,
    config: SharedConfig,
}

impl GlobalLockManager {
    /// Create a lock manager for the given node.
    pub fn new(
        local: MemberId,
        registry: Arc<LocalLockRegistry>,
        barrier: Arc<ResponseBarrier>,
        config: SharedConfig,
    ) -> Self {
        Self {
            local,
            registry,
            barrier,
            config,
        }
    }

    /// Acquire the cluster-wide exclusive lock for `path` using the
    /// configured mutex wait timeout. `Ok(false)` means the distributed
    /// mutex wait timed out — non-fatal, the caller may retry later.
    pub async fn lock(&self, path: &LogicalPath) -> Result<bool, LockError> {
        let wait = self.config.current().lock_timeout();
        self.lock_with_wait(path, wait).await
    }

    /// Like [`lock`](Self::lock) with an explicit mutex wait timeout.
    pub async fn lock_with_wait(
        &self,
        path: &LogicalPath,
        wait: Duration,
    ) -> Result<bool, LockError> {
        // Timeouts and lease are re-read per call; in-flight config changes
        // apply to the next operation.
        let cfg = self.config.current();
        let key = path.key();

        match self
            .registry
            .try_acquire(&key, wait, cfg.lease_duration())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(path = %path, "distributed mutex wait timed out");
                self.compensate(path, &key).await;
                return Ok(false);
            }
            Err(source) => {
                self.compensate(path, &key).await;
                return Err(LockError::Local {
                    path: path.clone(),
                    source,
                });
            }
        }

        let request = Request::new(self.local, path.clone(), RequestBody::Lock);
        if let Err(source) = self.barrier.await_acks(&request, cfg.response_timeout()).await {
            warn!(path = %path, error = %source, "lock broadcast failed, rolling back");
            self.compensate(path, &key).await;
            return Err(LockError::Broadcast {
                path: path.clone(),
                source,
            });
        }

        debug!(path = %path, "cluster lock acquired");
        Ok(true)
    }

    /// Release the cluster-wide lock for `path`. The local mutex is released
    /// even when the unlock broadcast fails; the broadcast failure is
    /// surfaced only after the release has happened.
    pub async fn unlock(&self, path: &LogicalPath) -> Result<(), UnlockError> {
        let cfg = self.config.current();
        let request = Request::new(self.local, path.clone(), RequestBody::Unlock);
        let outcome = self.barrier.await_acks(&request, cfg.response_timeout()).await;

        self.registry.release(&path.key()).await;

        outcome.map_err(|source| UnlockError {
            path: path.clone(),
            source,
        })
    }

    /// True if this node currently holds the lock for `path`. Local-registry
    /// lookup only, not a cluster-wide query.
    pub async fn is_locked(&self, path: &LogicalPath) -> bool {
        self.registry.is_locked(&path.key()).await
    }

    /// Best-effort rollback: broadcast an unlock so remote nodes drop any
    /// partial per-node lock (its own failure only logged), then release
    /// whatever this node acquired locally.
    async fn compensate(&self, path: &LogicalPath, key: &str) {
        let cfg = self.config.current();
        let request = Request::new(self.local, path.clone(), RequestBody::Unlock);
        if let Err(e) = self.barrier.await_acks(&request, cfg.response_timeout()).await {
            warn!(path = %path, error = %e, "compensating unlock broadcast failed");
        }
        self.registry.release(key).await;
    }
}
