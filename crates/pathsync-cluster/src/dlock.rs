//! Lease-based distributed mutex service.
//!
//! The cluster-wide source of truth for path ownership: at most one holder
//! per key at any instant, with automatic release once a holder's lease
//! lapses (bounding the damage of a crashed holder). This implementation is
//! the in-process seam; production deployments back it with the cluster's
//! locking primitive.

use crate::membership::MemberId;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Poll step while waiting for a contended key. Lease expiry is passive, so
/// waiters re-check at this granularity as well as on explicit releases.
const CONTENTION_POLL: Duration = Duration::from_millis(25);

/// A held distributed mutex for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexHandle {
    /// The locked key.
    pub key: String,
    /// The member holding the lease.
    pub holder: MemberId,
    /// Lease duration granted at acquisition.
    pub lease: Duration,
}

#[derive(Debug)]
struct LeaseEntry {
    holder: MemberId,
    expires_at: Instant,
}

impl LeaseEntry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Try-acquire/release mutex service with passive lease expiry.
#[derive(Debug, Default)]
pub struct DistributedMutexService {
    leases: Mutex<HashMap<String, LeaseEntry>>,
    released: Notify,
}

impl DistributedMutexService {
    /// Create a service with no held leases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to take the mutex for `key`, waiting up to `wait` for the
    /// current holder to release it or for its lease to lapse. Returns `None`
    /// on wait timeout. A holder re-acquiring its own live key is rejected
    /// like any other contender.
    pub async fn try_acquire(
        &self,
        key: &str,
        holder: MemberId,
        wait: Duration,
        lease: Duration,
    ) -> Option<MutexHandle> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut leases = self.leases.lock().await;
                let now = Instant::now();
                let contended = leases.get(key).map(|e| e.live(now)).unwrap_or(false);
                if !contended {
                    leases.insert(
                        key.to_string(),
                        LeaseEntry {
                            holder,
                            expires_at: now + lease,
                        },
                    );
                    debug!(key, holder = %holder, lease_ms = lease.as_millis() as u64, "mutex acquired");
                    return Some(MutexHandle {
                        key: key.to_string(),
                        holder,
                        lease,
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(key, holder = %holder, "mutex wait timed out");
                return None;
            }
            let step = CONTENTION_POLL.min(deadline - now);
            let _ = tokio::time::timeout(step, self.released.notified()).await;
        }
    }

    /// Release a held mutex. Returns `false` if the lease already lapsed or
    /// was taken over by another holder.
    pub async fn release(&self, handle: &MutexHandle) -> bool {
        let mut leases = self.leases.lock().await;
        let owned = leases
            .get(&handle.key)
            .map(|e| e.holder == handle.holder)
            .unwrap_or(false);
        if owned {
            leases.remove(&handle.key);
        }
        drop(leases);
        self.released.notify_waiters();
        owned
    }

    /// Current live holder for `key`, if any.
    pub async fn holder(&self, key: &str) -> Option<MemberId> {
        let leases = self.leases.lock().await;
        let now = Instant::now();
        leases.get(key).filter(|e| e.live(now)).map(|e| e.holder)
    }

    /// True if `key` has a live holder.
    pub async fn is_held(&self, key: &str) -> bool {
        self.holder(key).await.is_some()
    }
}
