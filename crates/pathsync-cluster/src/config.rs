//! Coordination timeouts and lease settings.
//!
//! All values are runtime-mutable: managers snapshot the current values once
//! per call rather than caching them, so operations started after a config
//! change pick it up immediately.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Timeouts and lease durations for the coordination protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// How long `lock` waits for the distributed mutex, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Lease placed on every acquired distributed mutex, in milliseconds.
    /// A crashed holder is bounded by this lease.
    pub lease_duration_ms: u64,
    /// Total deadline for one response barrier call, in milliseconds.
    pub response_timeout_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 15_000,
            lease_duration_ms: 60_000,
            response_timeout_ms: 10_000,
        }
    }
}

impl CoordinationConfig {
    /// Distributed mutex wait timeout.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Distributed mutex lease duration.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    /// Response barrier deadline.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Registry drain bound on shutdown, derived from the lease duration:
    /// any lock still held past its lease will lapse on its own.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }
}

/// Shared, runtime-mutable handle to the coordination config.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<CoordinationConfig>>,
}

impl SharedConfig {
    /// Wrap a config for shared access.
    pub fn new(config: CoordinationConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Snapshot the current values.
    pub fn current(&self) -> CoordinationConfig {
        self.inner.read().unwrap().clone()
    }

    /// Mutate the config in place; in-flight operations keep the values they
    /// snapshotted, later calls see the update.
    pub fn update(&self, f: impl FnOnce(&mut CoordinationConfig)) {
        f(&mut self.inner.write().unwrap());
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(CoordinationConfig::default())
    }
}
