//! Response barrier: broadcast one request, await every member.
//!
//! A barrier call snapshots the current membership, publishes the request,
//! and blocks until each snapshotted member acks, fails, or leaves the
//! cluster — all under a single total deadline. Member departure is a
//! harmless completion, never a failure. Per-member failures are aggregated
//! so operators see every failing member, not just the first.

use crate::bus::TopicBus;
use crate::error::BarrierError;
use crate::membership::{MemberId, MembershipEvent, MembershipView};
use crate::message::{ack_topic, Ack, Request};
use crate::shutdown::ShutdownListener;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Resolution state of one member's slot in a barrier call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// No ack, failure, or departure seen yet.
    Pending,
    /// The member acked successfully.
    Success,
    /// The member reported a failure.
    Failure(String),
}

/// Per-call map of member to resolution state. First write wins per slot: a
/// response and a departure racing for the same member are both valid
/// completions.
#[derive(Debug)]
pub struct ResponseSet {
    slots: HashMap<MemberId, SlotState>,
}

impl ResponseSet {
    /// Seed a set with every given member marked pending.
    pub fn new(members: impl IntoIterator<Item = MemberId>) -> Self {
        Self {
            slots: members.into_iter().map(|m| (m, SlotState::Pending)).collect(),
        }
    }

    /// Resolve `member`'s slot from its ack. Returns `false` if the member is
    /// unknown to this call or already resolved.
    pub fn resolve(&mut self, member: MemberId, failure: Option<String>) -> bool {
        match self.slots.get_mut(&member) {
            Some(slot @ SlotState::Pending) => {
                *slot = match failure {
                    None => SlotState::Success,
                    Some(reason) => SlotState::Failure(reason),
                };
                true
            }
            _ => false,
        }
    }

    /// Drop `member`'s slot entirely: departure completes the slot without
    /// counting as success or failure.
    pub fn remove(&mut self, member: MemberId) {
        self.slots.remove(&member);
    }

    /// Drop slots for members no longer in `live` (resync after event lag).
    /// Already-resolved slots are kept; only pending absentees are dropped.
    pub fn retain_live(&mut self, live: &[MemberId]) {
        self.slots
            .retain(|m, state| *state != SlotState::Pending || live.contains(m));
    }

    /// Number of slots still pending.
    pub fn pending(&self) -> usize {
        self.slots
            .values()
            .filter(|s| **s == SlotState::Pending)
            .count()
    }

    /// True once no slot is pending.
    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    /// Consume the set, returning every recorded failure.
    pub fn into_failures(self) -> Vec<(MemberId, String)> {
        self.slots
            .into_iter()
            .filter_map(|(m, s)| match s {
                SlotState::Failure(reason) => Some((m, reason)),
                _ => None,
            })
            .collect()
    }
}

/// Broadcast-and-await-all primitive shared by every cluster operation.
#[derive(Debug)]
pub struct ResponseBarrier {
    bus: Arc<TopicBus>,
    membership: Arc<MembershipView>,
    shutdown: ShutdownListener,
}

impl ResponseBarrier {
    /// Create a barrier over the given bus and membership view.
    pub fn new(
        bus: Arc<TopicBus>,
        membership: Arc<MembershipView>,
        shutdown: ShutdownListener,
    ) -> Self {
        Self {
            bus,
            membership,
            shutdown,
        }
    }

    /// Broadcast `request` on its topic and wait until every currently-known
    /// member acks, fails, or leaves the cluster, bounded by `timeout` as the
    /// total deadline. An empty membership snapshot succeeds immediately
    /// without publishing.
    pub async fn await_acks(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<(), BarrierError> {
        if self.shutdown.is_triggered() {
            return Err(BarrierError::Cancelled);
        }

        let members = self.membership.snapshot();
        if members.is_empty() {
            debug!(topic = request.topic(), path = %request.path, "no members to wait for");
            return Ok(());
        }
        let mut set = ResponseSet::new(members);

        // Subscribe before publishing so an ack cannot race ahead of the wait.
        let topic = request.topic();
        let response_topic = ack_topic(topic);
        let mut acks = self.bus.subscribe::<Ack>(&response_topic);
        let mut membership_rx = self.membership.subscribe();
        let mut shutdown = self.shutdown.clone();

        self.bus
            .publish(topic, request)
            .map_err(|source| BarrierError::Publish {
                topic: topic.to_string(),
                source,
            })?;

        let deadline = tokio::time::Instant::now() + timeout;
        while !set.is_complete() {
            tokio::select! {
                ack = acks.recv() => match ack {
                    Some(ack) if ack.path == request.path => {
                        set.resolve(ack.member, ack.failure);
                    }
                    Some(_) => {} // ack for a different path on the same topic
                    None => {
                        return Err(BarrierError::ChannelClosed {
                            topic: response_topic,
                        });
                    }
                },
                event = membership_rx.recv() => match event {
                    Ok(MembershipEvent::Left(member)) => {
                        debug!(member = %member, path = %request.path, "member left during wait, slot resolved");
                        set.remove(member);
                    }
                    Ok(MembershipEvent::Joined(_)) => {} // joined after the snapshot, not awaited
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "membership events lagged, resyncing from snapshot");
                        set.retain_live(&self.membership.snapshot());
                    }
                    Err(broadcast::error::RecvError::Closed) => {} // view dropped, acks still drive completion
                },
                _ = shutdown.wait() => {
                    return Err(BarrierError::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(BarrierError::Timeout {
                        topic: topic.to_string(),
                        waited_ms: timeout.as_millis() as u64,
                        pending: set.pending(),
                    });
                }
            }
        }

        let failures = set.into_failures();
        if failures.is_empty() {
            Ok(())
        } else {
            for (member, reason) in &failures {
                warn!(member = %member, path = %request.path, topic, reason = %reason, "member reported failure");
            }
            Err(BarrierError::Aggregated { failures })
        }
    }
}
