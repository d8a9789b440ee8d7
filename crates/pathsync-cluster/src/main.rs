//! pathsyncd — in-process demo cluster.
//!
//! Spins up three nodes on a shared bus and mutex service, replicates one
//! file change end to end, then shuts everything down.

use anyhow::Result;
use bytes::Bytes;
use pathsync_cluster::bus::TopicBus;
use pathsync_cluster::checksum;
use pathsync_cluster::client::ClusterClient;
use pathsync_cluster::config::CoordinationConfig;
use pathsync_cluster::dlock::DistributedMutexService;
use pathsync_cluster::membership::MemberId;
use pathsync_cluster::path::LogicalPath;
use pathsync_cluster::responder::{InMemorySyncTarget, SyncTarget};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let bus = Arc::new(TopicBus::default());
    let mutex_service = Arc::new(DistributedMutexService::new());

    let mut nodes = Vec::new();
    for _ in 0..3 {
        let target = Arc::new(InMemorySyncTarget::new());
        let client = ClusterClient::new(
            MemberId::random(),
            Arc::clone(&bus),
            Arc::clone(&mutex_service),
            Arc::clone(&target) as Arc<dyn SyncTarget>,
            CoordinationConfig::default(),
        );
        nodes.push((client, target));
    }
    for (client, _) in &nodes {
        for (other, _) in &nodes {
            client.membership().join(other.member_id());
        }
        info!(member = %client.member_id(), "node online");
    }

    let (writer, _) = &nodes[0];
    let contents = b"hello from the writer node\n";
    let sum = checksum::digest(contents);

    anyhow::ensure!(
        writer.lock("projects", "report.txt").await?,
        "could not acquire the cluster lock"
    );
    writer
        .transfer("projects", "report.txt", Bytes::from_static(contents))
        .await?;
    writer.store("projects", "report.txt", sum.clone()).await?;
    writer.unlock("projects", "report.txt").await?;
    info!("change replicated and lock released");

    let path = LogicalPath::new("projects", "report.txt");
    for (client, target) in &nodes[1..] {
        let replica = target.contents(&path).await;
        info!(
            member = %client.member_id(),
            bytes = replica.as_ref().map(|c| c.len()).unwrap_or(0),
            checksum_matches = client.checksum("projects", "report.txt") == sum,
            "replica state"
        );
    }

    for (client, _) in nodes {
        client.shutdown().await;
    }
    Ok(())
}
