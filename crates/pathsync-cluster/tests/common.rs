//! Common test utilities for multi-node protocol tests.

use pathsync_cluster::bus::TopicBus;
use pathsync_cluster::client::ClusterClient;
use pathsync_cluster::config::CoordinationConfig;
use pathsync_cluster::dlock::DistributedMutexService;
use pathsync_cluster::membership::MemberId;
use pathsync_cluster::responder::{InMemorySyncTarget, SyncTarget};
use std::sync::Arc;

/// One node of an in-process test cluster.
pub struct TestNode {
    pub client: ClusterClient,
    pub target: Arc<InMemorySyncTarget>,
}

/// An in-process cluster sharing one bus and one mutex service.
pub struct TestCluster {
    pub nodes: Vec<TestNode>,
    pub bus: Arc<TopicBus>,
    pub mutex_service: Arc<DistributedMutexService>,
}

impl TestCluster {
    /// Build a fully-joined cluster of `n` nodes with fast test timeouts.
    pub fn new(n: usize) -> Self {
        Self::with_config(n, test_config())
    }

    /// Build a fully-joined cluster of `n` nodes with the given config.
    pub fn with_config(n: usize, config: CoordinationConfig) -> Self {
        let bus = Arc::new(TopicBus::default());
        let mutex_service = Arc::new(DistributedMutexService::new());
        let nodes: Vec<TestNode> = (0..n)
            .map(|_| {
                let target = Arc::new(InMemorySyncTarget::new());
                let client = ClusterClient::new(
                    MemberId::random(),
                    Arc::clone(&bus),
                    Arc::clone(&mutex_service),
                    Arc::clone(&target) as Arc<dyn SyncTarget>,
                    config.clone(),
                );
                TestNode { client, target }
            })
            .collect();

        for node in &nodes {
            for other in &nodes {
                node.client.membership().join(other.client.member_id());
            }
        }
        Self {
            nodes,
            bus,
            mutex_service,
        }
    }

    /// Tell every node that `member` left the cluster.
    pub fn remove_member(&self, member: MemberId) {
        for node in &self.nodes {
            node.client.membership().leave(member);
        }
    }
}

/// Fast timeouts so failure scenarios resolve quickly.
pub fn test_config() -> CoordinationConfig {
    CoordinationConfig {
        lock_timeout_ms: 300,
        lease_duration_ms: 5_000,
        response_timeout_ms: 1_000,
    }
}
