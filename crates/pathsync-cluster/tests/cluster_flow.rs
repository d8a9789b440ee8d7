//! End-to-end protocol scenarios across an in-process cluster.

mod common;

use bytes::Bytes;
use common::{test_config, TestCluster};
use pathsync_cluster::checksum;
use pathsync_cluster::error::{BarrierError, LockError};
use pathsync_cluster::membership::MemberId;
use pathsync_cluster::path::LogicalPath;
use std::time::Duration;

#[tokio::test]
async fn test_lock_succeeds_when_all_members_ack() {
    let cluster = TestCluster::new(3);
    let writer = &cluster.nodes[0].client;

    assert!(writer.lock("dir", "f").await.unwrap());
    assert!(writer.is_locked("dir", "f").await);

    // every other node took its local file lock for the path
    let path = LogicalPath::new("dir", "f");
    for node in &cluster.nodes[1..] {
        assert!(node.target.is_locked_local(&path).await);
    }

    writer.unlock("dir", "f").await.unwrap();
    for node in &cluster.nodes[1..] {
        assert!(!node.target.is_locked_local(&path).await);
    }
}

#[tokio::test]
async fn test_silent_member_times_out_and_releases_mutex() {
    let cluster = TestCluster::with_config(
        2,
        pathsync_cluster::config::CoordinationConfig {
            response_timeout_ms: 500,
            ..test_config()
        },
    );
    let writer = &cluster.nodes[0].client;

    // a phantom member that will never answer
    writer.membership().join(MemberId::random());

    let err = writer.lock("dir", "f").await.unwrap_err();
    match err {
        LockError::Broadcast { source, .. } => {
            assert!(matches!(source, BarrierError::Timeout { .. }));
        }
        other => panic!("expected broadcast timeout, got {other:?}"),
    }
    // compensation released the distributed mutex before `lock` returned
    assert!(!writer.is_locked("dir", "f").await);
    assert!(!cluster.mutex_service.is_held("dir:f").await);
}

#[tokio::test]
async fn test_member_departure_during_wait_is_success() {
    let cluster = TestCluster::new(2);
    let writer = &cluster.nodes[0].client;

    // a phantom member that never answers but departs mid-wait
    let phantom = MemberId::random();
    writer.membership().join(phantom);

    let membership = std::sync::Arc::clone(writer.membership());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        membership.leave(phantom);
    });

    assert!(writer.lock("dir", "f").await.unwrap());
    writer.unlock("dir", "f").await.unwrap();
}

#[tokio::test]
async fn test_store_updates_checksum_on_every_node() {
    let cluster = TestCluster::new(3);
    let writer = &cluster.nodes[0].client;

    assert!(writer.lock("dir", "f").await.unwrap());
    writer
        .transfer("dir", "f", Bytes::from_static(b"chunk one, "))
        .await
        .unwrap();
    writer
        .transfer("dir", "f", Bytes::from_static(b"chunk two"))
        .await
        .unwrap();
    let sum = checksum::digest(b"chunk one, chunk two");
    writer.store("dir", "f", sum.clone()).await.unwrap();
    writer.unlock("dir", "f").await.unwrap();

    for node in &cluster.nodes {
        assert_eq!(node.client.checksum("dir", "f"), sum);
        assert!(node.client.checksum("dir", "never-stored").is_empty());
    }
    let path = LogicalPath::new("dir", "f");
    for node in &cluster.nodes[1..] {
        assert_eq!(
            node.target.contents(&path).await,
            Some(b"chunk one, chunk two".to_vec())
        );
    }
}

#[tokio::test]
async fn test_delete_removes_contents_everywhere() {
    let cluster = TestCluster::new(2);
    let writer = &cluster.nodes[0].client;

    assert!(writer.lock("dir", "f").await.unwrap());
    writer
        .transfer("dir", "f", Bytes::from_static(b"doomed"))
        .await
        .unwrap();
    writer
        .store("dir", "f", checksum::digest(b"doomed"))
        .await
        .unwrap();
    writer.unlock("dir", "f").await.unwrap();

    assert!(writer.lock("dir", "f").await.unwrap());
    writer.delete("dir", "f").await.unwrap();
    writer.unlock("dir", "f").await.unwrap();

    let path = LogicalPath::new("dir", "f");
    for node in &cluster.nodes[1..] {
        assert_eq!(node.target.contents(&path).await, None);
    }
    assert!(writer.checksum("dir", "f").is_empty());
}

#[tokio::test]
async fn test_mutual_exclusion_across_writers() {
    let cluster = TestCluster::new(3);
    let a = &cluster.nodes[0].client;
    let b = &cluster.nodes[1].client;

    assert!(a.lock("dir", "f").await.unwrap());
    assert!(!b.lock("dir", "f").await.unwrap());
    // a different path locks independently
    assert!(b.lock("dir", "g").await.unwrap());

    a.unlock("dir", "f").await.unwrap();
    b.unlock("dir", "g").await.unwrap();
    assert!(b.lock("dir", "f").await.unwrap());
    b.unlock("dir", "f").await.unwrap();
}

#[tokio::test]
async fn test_writer_crash_releases_remote_state() {
    let cluster = TestCluster::new(3);
    let writer = &cluster.nodes[0].client;
    let writer_id = writer.member_id();

    assert!(writer.lock("dir", "f").await.unwrap());
    writer
        .transfer("dir", "f", Bytes::from_static(b"half-written"))
        .await
        .unwrap();

    // the writer crashes: every surviving node sees the departure
    cluster.remove_member(writer_id);

    let path = LogicalPath::new("dir", "f");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let mut clean = true;
        for node in &cluster.nodes[1..] {
            if node.target.is_locked_local(&path).await {
                clean = false;
            }
        }
        if clean {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "node-loss reactor did not release the departed writer's locks"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // nothing was committed from the half-streamed change
    for node in &cluster.nodes[1..] {
        assert_eq!(node.target.contents(&path).await, None);
    }
}

#[tokio::test]
async fn test_lease_expiry_frees_a_crashed_writers_mutex() {
    let cluster = TestCluster::with_config(
        2,
        pathsync_cluster::config::CoordinationConfig {
            lease_duration_ms: 300,
            ..test_config()
        },
    );
    let crashed = &cluster.nodes[0].client;
    let survivor = &cluster.nodes[1].client;
    let crashed_id = crashed.member_id();

    assert!(crashed.lock("dir", "f").await.unwrap());
    cluster.remove_member(crashed_id);

    // the survivor can lock once the crashed writer's lease lapses
    let start = std::time::Instant::now();
    loop {
        if survivor.lock("dir", "f").await.unwrap() {
            break;
        }
        assert!(
            start.elapsed() < Duration::from_secs(3),
            "lease never lapsed"
        );
    }
    survivor.unlock("dir", "f").await.unwrap();
}

#[tokio::test]
async fn test_graceful_shutdown_drains() {
    let cluster = TestCluster::new(2);
    for node in cluster.nodes {
        tokio::time::timeout(Duration::from_secs(3), node.client.shutdown())
            .await
            .expect("shutdown should complete within the drain bound");
    }
}
