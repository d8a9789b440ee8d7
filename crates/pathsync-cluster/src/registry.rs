//! Local lock registry: per-node bookkeeping of held distributed mutexes.
//!
//! Maps each locked key to its mutex handle, rejects new acquisitions during
//! graceful shutdown, and supports a bounded drain that waits for in-flight
//! operations to release what they hold.

use crate::dlock::{DistributedMutexService, MutexHandle};
use crate::error::RegistryError;
use crate::membership::MemberId;
use crate::shutdown::ShutdownListener;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// Poll step while draining on shutdown.
const DRAIN_POLL: Duration = Duration::from_millis(25);

/// Per-node map of locked key to held distributed mutex handle.
#[derive(Debug)]
pub struct LocalLockRegistry {
    member: MemberId,
    service: Arc<DistributedMutexService>,
    held: Mutex<HashMap<String, MutexHandle>>,
    shutting_down: AtomicBool,
    released: Notify,
    shutdown: ShutdownListener,
}

impl LocalLockRegistry {
    /// Create a registry for `member` backed by the given mutex service.
    pub fn new(
        member: MemberId,
        service: Arc<DistributedMutexService>,
        shutdown: ShutdownListener,
    ) -> Self {
        Self {
            member,
            service,
            held: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            released: Notify::new(),
            shutdown,
        }
    }

    /// Attempt to obtain the distributed mutex for `key` and record the
    /// handle. Returns `Ok(false)` on a plain wait timeout. Fails fast once
    /// graceful shutdown has begun, and aborts with
    /// [`RegistryError::Cancelled`] if the shutdown signal fires mid-wait.
    ///
    /// Acquisition always goes through the distributed primitive — even for
    /// a key this node believes it already holds — because the primitive is
    /// the source of truth.
    pub async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<bool, RegistryError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(RegistryError::ShuttingDown);
        }

        let mut shutdown = self.shutdown.clone();
        let handle = tokio::select! {
            handle = self.service.try_acquire(key, self.member, wait, lease) => handle,
            _ = shutdown.wait() => return Err(RegistryError::Cancelled),
        };

        match handle {
            Some(handle) => {
                let mut held = self.held.lock().await;
                if held.insert(key.to_string(), handle).is_some() {
                    // the primitive never grants a live key twice, so a
                    // previous entry here means its lease had already lapsed
                    warn!(key, "replaced a stale handle for key");
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove and release the handle for `key`. Releasing an unknown key is
    /// not an error: a remote-triggered unlock may race local bookkeeping.
    pub async fn release(&self, key: &str) {
        let handle = self.held.lock().await.remove(key);
        match handle {
            Some(handle) => {
                if !self.service.release(&handle).await {
                    warn!(key, "distributed mutex had already lapsed on release");
                }
                debug!(key, "released local lock");
                self.released.notify_waiters();
            }
            None => {
                warn!(key, "release for a key with no held lock");
            }
        }
    }

    /// True if this node currently records a held lock for `key`.
    pub async fn is_locked(&self, key: &str) -> bool {
        self.held.lock().await.contains_key(key)
    }

    /// Keys this node currently records as held.
    pub async fn held_keys(&self) -> Vec<String> {
        self.held.lock().await.keys().cloned().collect()
    }

    /// Close the registry to new acquisitions, then wait (bounded by
    /// `drain_timeout`) for in-flight operations to release their handles.
    /// Gives up after the bound, logging any still-held keys — their leases
    /// will lapse on their own.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.shutting_down.store(true, Ordering::Release);
        let deadline = Instant::now() + drain_timeout;
        loop {
            let leftover = self.held_keys().await;
            if leftover.is_empty() {
                debug!("lock registry drained");
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(?leftover, "lock registry drain timed out with locks still held");
                return;
            }
            let step = DRAIN_POLL.min(deadline - now);
            let _ = tokio::time::timeout(step, self.released.notified()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownSignal;

    const WAIT: Duration = Duration::from_millis(100);
    const LEASE: Duration = Duration::from_secs(10);

    fn make_registry() -> (Arc<LocalLockRegistry>, Arc<DistributedMutexService>, ShutdownSignal) {
        let service = Arc::new(DistributedMutexService::new());
        let signal = ShutdownSignal::new();
        let registry = Arc::new(LocalLockRegistry::new(
            MemberId::random(),
            Arc::clone(&service),
            signal.listener(),
        ));
        (registry, service, signal)
    }

    #[tokio::test]
    async fn test_acquire_records_handle() {
        let (registry, service, _signal) = make_registry();
        assert!(registry.try_acquire("dir:f", WAIT, LEASE).await.unwrap());
        assert!(registry.is_locked("dir:f").await);
        assert!(service.is_held("dir:f").await);
    }

    #[tokio::test]
    async fn test_release_clears_handle_and_service() {
        let (registry, service, _signal) = make_registry();
        registry.try_acquire("dir:f", WAIT, LEASE).await.unwrap();
        registry.release("dir:f").await;
        assert!(!registry.is_locked("dir:f").await);
        assert!(!service.is_held("dir:f").await);
    }

    #[tokio::test]
    async fn test_release_unknown_key_is_noop() {
        let (registry, _service, _signal) = make_registry();
        registry.release("dir:f").await;
        assert!(!registry.is_locked("dir:f").await);
    }

    #[tokio::test]
    async fn test_contended_acquire_returns_false() {
        let (registry, service, _signal) = make_registry();
        let _held = service
            .try_acquire("dir:f", MemberId::random(), WAIT, LEASE)
            .await
            .unwrap();
        assert!(!registry.try_acquire("dir:f", WAIT, LEASE).await.unwrap());
        assert!(!registry.is_locked("dir:f").await);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_acquisitions() {
        let (registry, _service, _signal) = make_registry();
        registry.shutdown(Duration::from_millis(10)).await;
        let err = registry.try_acquire("dir:f", WAIT, LEASE).await.unwrap_err();
        assert!(matches!(err, RegistryError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_shutdown_signal_cancels_wait() {
        let (registry, service, signal) = make_registry();
        let _held = service
            .try_acquire("dir:f", MemberId::random(), WAIT, LEASE)
            .await
            .unwrap();

        let reg = Arc::clone(&registry);
        let acquire = tokio::spawn(async move {
            reg.try_acquire("dir:f", Duration::from_secs(5), LEASE).await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        signal.trigger();
        let err = acquire.await.unwrap().unwrap_err();
        assert!(matches!(err, RegistryError::Cancelled));
    }

    #[tokio::test]
    async fn test_shutdown_drains_once_locks_release() {
        let (registry, _service, _signal) = make_registry();
        registry.try_acquire("dir:f", WAIT, LEASE).await.unwrap();

        let reg = Arc::clone(&registry);
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            reg.release("dir:f").await;
        });

        let start = Instant::now();
        registry.shutdown(Duration::from_secs(2)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
        releaser.await.unwrap();
        assert!(!registry.is_locked("dir:f").await);
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_after_drain_bound() {
        let (registry, _service, _signal) = make_registry();
        registry.try_acquire("dir:f", WAIT, LEASE).await.unwrap();
        let start = Instant::now();
        registry.shutdown(Duration::from_millis(80)).await;
        assert!(start.elapsed() >= Duration::from_millis(80));
        // the lock is still recorded; its lease will lapse on its own
        assert!(registry.is_locked("dir:f").await);
    }
}
