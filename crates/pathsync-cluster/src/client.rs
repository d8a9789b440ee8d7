//! One node's endpoint for the coordination protocol.
//!
//! Wires the membership view, topic bus, distributed mutex service, local
//! lock registry, response barrier, global lock manager, replication
//! dispatcher, responder, and node-loss reactor into a single client exposing
//! the public operation surface.

use crate::barrier::ResponseBarrier;
use crate::bus::TopicBus;
use crate::checksum::ChecksumTable;
use crate::config::{CoordinationConfig, SharedConfig};
use crate::dispatcher::ReplicationDispatcher;
use crate::dlock::DistributedMutexService;
use crate::error::{LockError, ReplicationError, UnlockError};
use crate::lock_manager::GlobalLockManager;
use crate::membership::{MemberId, MembershipView};
use crate::path::LogicalPath;
use crate::reactor::NodeLossReactor;
use crate::registry::LocalLockRegistry;
use crate::responder::{OriginStateTracker, Responder, SyncTarget};
use crate::shutdown::ShutdownSignal;
use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// A cluster node's protocol client.
///
/// The bus and distributed mutex service are shared, externally-provided
/// infrastructure; everything else is owned per client. Feed membership
/// changes from the cluster substrate through [`membership`](Self::membership).
pub struct ClusterClient {
    id: MemberId,
    config: SharedConfig,
    membership: Arc<MembershipView>,
    registry: Arc<LocalLockRegistry>,
    lock_manager: GlobalLockManager,
    dispatcher: ReplicationDispatcher,
    checksums: Arc<ChecksumTable>,
    shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl ClusterClient {
    /// Create a client for member `id` on the shared bus and mutex service,
    /// delegating local filesystem effects to `target`.
    pub fn new(
        id: MemberId,
        bus: Arc<TopicBus>,
        mutex_service: Arc<DistributedMutexService>,
        target: Arc<dyn SyncTarget>,
        config: CoordinationConfig,
    ) -> Self {
        let config = SharedConfig::new(config);
        let membership = Arc::new(MembershipView::new(id));
        let shutdown = ShutdownSignal::new();
        let checksums = Arc::new(ChecksumTable::new());
        let tracker = Arc::new(OriginStateTracker::new());

        let registry = Arc::new(LocalLockRegistry::new(
            id,
            mutex_service,
            shutdown.listener(),
        ));
        let barrier = Arc::new(ResponseBarrier::new(
            Arc::clone(&bus),
            Arc::clone(&membership),
            shutdown.listener(),
        ));

        let tasks = vec![
            Responder::spawn(
                id,
                Arc::clone(&bus),
                Arc::clone(&target),
                Arc::clone(&tracker),
                Arc::clone(&checksums),
                shutdown.listener(),
            ),
            NodeLossReactor::spawn(
                Arc::clone(&membership),
                tracker,
                target,
                shutdown.listener(),
            ),
        ];

        let lock_manager = GlobalLockManager::new(
            id,
            Arc::clone(&registry),
            Arc::clone(&barrier),
            config.clone(),
        );
        let dispatcher =
            ReplicationDispatcher::new(id, barrier, config.clone(), Arc::clone(&checksums));

        Self {
            id,
            config,
            membership,
            registry,
            lock_manager,
            dispatcher,
            checksums,
            shutdown,
            tasks,
        }
    }

    /// This node's member id.
    pub fn member_id(&self) -> MemberId {
        self.id
    }

    /// The membership view, for the cluster substrate to feed and for
    /// observers to snapshot.
    pub fn membership(&self) -> &Arc<MembershipView> {
        &self.membership
    }

    /// The runtime-mutable coordination config.
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// Acquire the cluster-wide exclusive lock for `(sync_dir, rel_path)`.
    /// `Ok(false)` means the distributed mutex wait timed out; retry later.
    pub async fn lock(&self, sync_dir: &str, rel_path: &str) -> Result<bool, LockError> {
        self.lock_manager
            .lock(&LogicalPath::new(sync_dir, rel_path))
            .await
    }

    /// Release the cluster-wide lock for `(sync_dir, rel_path)`.
    pub async fn unlock(&self, sync_dir: &str, rel_path: &str) -> Result<(), UnlockError> {
        self.lock_manager
            .unlock(&LogicalPath::new(sync_dir, rel_path))
            .await
    }

    /// True if this node holds the lock for `(sync_dir, rel_path)`.
    /// Local-registry lookup only, not a cluster-wide query.
    pub async fn is_locked(&self, sync_dir: &str, rel_path: &str) -> bool {
        self.lock_manager
            .is_locked(&LogicalPath::new(sync_dir, rel_path))
            .await
    }

    /// Delete the path on every node. The path must be locked by this node.
    pub async fn delete(&self, sync_dir: &str, rel_path: &str) -> Result<(), ReplicationError> {
        self.dispatcher
            .delete(&LogicalPath::new(sync_dir, rel_path))
            .await
    }

    /// Stream a chunk of change bytes for the locked path to every node.
    pub async fn transfer(
        &self,
        sync_dir: &str,
        rel_path: &str,
        bytes: Bytes,
    ) -> Result<(), ReplicationError> {
        self.dispatcher
            .transfer(&LogicalPath::new(sync_dir, rel_path), bytes)
            .await
    }

    /// Commit the streamed bytes for the locked path on every node.
    pub async fn store(
        &self,
        sync_dir: &str,
        rel_path: &str,
        checksum: Vec<u8>,
    ) -> Result<(), ReplicationError> {
        self.dispatcher
            .store(&LogicalPath::new(sync_dir, rel_path), checksum)
            .await
    }

    /// Drop the streamed bytes for the locked path on every node.
    pub async fn discard(
        &self,
        sync_dir: &str,
        rel_path: &str,
        reason: impl Into<String>,
    ) -> Result<(), ReplicationError> {
        self.dispatcher
            .discard(&LogicalPath::new(sync_dir, rel_path), reason)
            .await
    }

    /// Digest of the last successfully stored contents for the path, or an
    /// empty digest if the path was never stored.
    pub fn checksum(&self, sync_dir: &str, rel_path: &str) -> Vec<u8> {
        self.checksums.get(&LogicalPath::new(sync_dir, rel_path))
    }

    /// Record a digest for the path directly (e.g. seeded from a full sync).
    pub fn store_checksum(&self, sync_dir: &str, rel_path: &str, checksum: Vec<u8>) {
        self.checksums
            .put(LogicalPath::new(sync_dir, rel_path), checksum);
    }

    /// Graceful shutdown: cancel in-flight waits, close the registry to new
    /// acquisitions, drain held locks (bounded by the configured drain
    /// timeout), and stop the responder and reactor.
    pub async fn shutdown(mut self) {
        info!(member = %self.id, "cluster client shutting down");
        self.shutdown.trigger();
        let drain = self.config.current().drain_timeout();
        self.registry.shutdown(drain).await;
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}
