//! Per-node replication responder.
//!
//! Consumes broadcast requests from the bus, applies their filesystem effect
//! through the injected [`SyncTarget`], records per-origin in-flight state,
//! and answers every request with an [`Ack`] carrying success or the local
//! failure reason. Requests originating from this node are skipped — the
//! writer side already holds the local state.

use crate::bus::{Subscription, TopicBus};
use crate::checksum::{self, ChecksumTable};
use crate::error::SyncTargetError;
use crate::membership::MemberId;
use crate::message::{ack_topic, topics, Ack, Request, RequestBody};
use crate::path::LogicalPath;
use crate::shutdown::ShutdownListener;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Filesystem effects the responder delegates to. Implemented by the on-disk
/// sync target; tests and the demo use [`InMemorySyncTarget`].
#[async_trait]
pub trait SyncTarget: Send + Sync + 'static {
    /// Take the node-local file lock for `path`.
    async fn lock_local(&self, path: &LogicalPath) -> Result<(), SyncTargetError>;

    /// Release the node-local file lock for `path`. Must tolerate paths that
    /// are not locked.
    async fn unlock_local(&self, path: &LogicalPath) -> Result<(), SyncTargetError>;

    /// Remove `path` locally.
    async fn delete(&self, path: &LogicalPath) -> Result<(), SyncTargetError>;

    /// Durably commit the complete payload for `path`.
    async fn store(&self, path: &LogicalPath, bytes: &[u8]) -> Result<(), SyncTargetError>;

    /// Drop any partial local state for `path`.
    async fn discard(&self, path: &LogicalPath) -> Result<(), SyncTargetError>;
}

#[derive(Debug, Default)]
struct OpenState {
    locked: HashSet<LogicalPath>,
    buffers: HashMap<LogicalPath, Vec<u8>>,
}

impl OpenState {
    fn is_empty(&self) -> bool {
        self.locked.is_empty() && self.buffers.is_empty()
    }
}

/// Replication state held on behalf of remote writers, keyed by origin.
/// Consumed by the responder while requests flow, and by the node-loss
/// reactor when an origin departs.
#[derive(Debug, Default)]
pub struct OriginStateTracker {
    states: Mutex<HashMap<MemberId, OpenState>>,
}

impl OriginStateTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `origin` holds the local file lock for `path`.
    pub async fn note_locked(&self, origin: MemberId, path: LogicalPath) {
        self.states
            .lock()
            .await
            .entry(origin)
            .or_default()
            .locked
            .insert(path);
    }

    /// Append transfer bytes for `origin`'s in-flight change to `path`.
    pub async fn append(&self, origin: MemberId, path: LogicalPath, bytes: &[u8]) {
        self.states
            .lock()
            .await
            .entry(origin)
            .or_default()
            .buffers
            .entry(path)
            .or_default()
            .extend_from_slice(bytes);
    }

    /// Take the buffered bytes for `origin`'s change to `path`, leaving no
    /// buffer behind.
    pub async fn take_buffer(&self, origin: MemberId, path: &LogicalPath) -> Vec<u8> {
        let mut states = self.states.lock().await;
        match states.get_mut(&origin) {
            Some(state) => state.buffers.remove(path).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Drop all state `origin` holds for `path` (lock note and buffer).
    pub async fn clear_path(&self, origin: MemberId, path: &LogicalPath) {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(&origin) {
            state.locked.remove(path);
            state.buffers.remove(path);
            if state.is_empty() {
                states.remove(&origin);
            }
        }
    }

    /// Remove and return every path `origin` held a local lock for. Buffers
    /// are dropped. Used when `origin` departs the cluster.
    pub async fn drain_origin(&self, origin: MemberId) -> Vec<LogicalPath> {
        match self.states.lock().await.remove(&origin) {
            Some(state) => state.locked.into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Paths `origin` currently holds local locks for.
    pub async fn locked_paths(&self, origin: MemberId) -> Vec<LogicalPath> {
        self.states
            .lock()
            .await
            .get(&origin)
            .map(|s| s.locked.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Handles incoming replication requests on one node.
pub struct Responder {
    local: MemberId,
    bus: Arc<TopicBus>,
    target: Arc<dyn SyncTarget>,
    tracker: Arc<OriginStateTracker>,
    checksums: Arc<ChecksumTable>,
}

impl Responder {
    /// Subscribe to every request topic and spawn the handler loop. The
    /// subscriptions are established before this returns, so requests
    /// published afterwards are never missed.
    pub fn spawn(
        local: MemberId,
        bus: Arc<TopicBus>,
        target: Arc<dyn SyncTarget>,
        tracker: Arc<OriginStateTracker>,
        checksums: Arc<ChecksumTable>,
        shutdown: ShutdownListener,
    ) -> JoinHandle<()> {
        let subscriptions: Vec<Subscription<Request>> = topics::ALL
            .iter()
            .map(|topic| bus.subscribe::<Request>(topic))
            .collect();
        let responder = Self {
            local,
            bus,
            target,
            tracker,
            checksums,
        };
        tokio::spawn(responder.run(subscriptions, shutdown))
    }

    async fn run(self, subscriptions: Vec<Subscription<Request>>, mut shutdown: ShutdownListener) {
        // Fan the per-topic subscriptions into one stream; topic identity is
        // recoverable from the request body.
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Request>(64);
        let mut pumps = Vec::new();
        for mut sub in subscriptions {
            let tx = tx.clone();
            pumps.push(tokio::spawn(async move {
                while let Some(req) = sub.recv().await {
                    if tx.send(req).await.is_err() {
                        return;
                    }
                }
            }));
        }
        drop(tx);

        loop {
            tokio::select! {
                req = rx.recv() => match req {
                    Some(req) => self.handle(req).await,
                    None => break,
                },
                _ = shutdown.wait() => break,
            }
        }
        for pump in pumps {
            pump.abort();
        }
        debug!(member = %self.local, "responder stopped");
    }

    async fn handle(&self, request: Request) {
        if request.origin == self.local {
            return;
        }
        let topic = request.topic();
        let path = request.path.clone();
        let origin = request.origin;

        let outcome = self.apply(origin, &path, request.body).await;
        if let Err(e) = &outcome {
            warn!(member = %self.local, origin = %origin, path = %path, error = %e,
                  "request failed locally");
        }

        let ack = match outcome {
            Ok(()) => Ack::success(self.local, path),
            Err(e) => Ack::failure(self.local, path, e.to_string()),
        };
        if let Err(e) = self.bus.publish(&ack_topic(topic), &ack) {
            warn!(member = %self.local, error = %e, "failed to publish ack");
        }
    }

    async fn apply(
        &self,
        origin: MemberId,
        path: &LogicalPath,
        body: RequestBody,
    ) -> Result<(), SyncTargetError> {
        match body {
            RequestBody::Lock => {
                self.target.lock_local(path).await?;
                self.tracker.note_locked(origin, path.clone()).await;
                Ok(())
            }
            RequestBody::Unlock => {
                self.target.unlock_local(path).await?;
                self.tracker.clear_path(origin, path).await;
                Ok(())
            }
            RequestBody::Delete => {
                self.target.delete(path).await?;
                self.checksums.remove(path);
                Ok(())
            }
            RequestBody::Transfer { bytes } => {
                self.tracker.append(origin, path.clone(), &bytes).await;
                Ok(())
            }
            RequestBody::Store { checksum: expected } => {
                let buffer = self.tracker.take_buffer(origin, path).await;
                let actual = checksum::digest(&buffer);
                if actual != expected {
                    return Err(SyncTargetError::new(format!(
                        "checksum mismatch for {path}: buffered {} byte(s) do not match the announced digest",
                        buffer.len()
                    )));
                }
                self.target.store(path, &buffer).await?;
                self.checksums.put(path.clone(), expected);
                Ok(())
            }
            RequestBody::Discard { reason } => {
                info!(origin = %origin, path = %path, reason, "discarding in-flight change");
                self.tracker.clear_path(origin, path).await;
                self.target.discard(path).await
            }
        }
    }
}

/// In-memory sync target used by tests and the demo binary.
#[derive(Debug, Default)]
pub struct InMemorySyncTarget {
    locked: Mutex<HashSet<LogicalPath>>,
    files: Mutex<HashMap<LogicalPath, Vec<u8>>>,
}

impl InMemorySyncTarget {
    /// Create an empty target.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the node-local file lock for `path` is held.
    pub async fn is_locked_local(&self, path: &LogicalPath) -> bool {
        self.locked.lock().await.contains(path)
    }

    /// Committed contents of `path`, if any.
    pub async fn contents(&self, path: &LogicalPath) -> Option<Vec<u8>> {
        self.files.lock().await.get(path).cloned()
    }
}

#[async_trait]
impl SyncTarget for InMemorySyncTarget {
    async fn lock_local(&self, path: &LogicalPath) -> Result<(), SyncTargetError> {
        let inserted = self.locked.lock().await.insert(path.clone());
        if inserted {
            Ok(())
        } else {
            Err(SyncTargetError::new(format!(
                "path {path} is already locked locally"
            )))
        }
    }

    async fn unlock_local(&self, path: &LogicalPath) -> Result<(), SyncTargetError> {
        self.locked.lock().await.remove(path);
        Ok(())
    }

    async fn delete(&self, path: &LogicalPath) -> Result<(), SyncTargetError> {
        self.files.lock().await.remove(path);
        Ok(())
    }

    async fn store(&self, path: &LogicalPath, bytes: &[u8]) -> Result<(), SyncTargetError> {
        self.files.lock().await.insert(path.clone(), bytes.to_vec());
        Ok(())
    }

    async fn discard(&self, _path: &LogicalPath) -> Result<(), SyncTargetError> {
        Ok(())
    }
}
