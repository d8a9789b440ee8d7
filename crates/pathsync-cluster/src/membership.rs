//! Node-local view of cluster membership.
//!
//! The membership substrate (SWIM or similar) owns the authoritative member
//! list; the protocol only reads snapshots and subscribes to change events.
//! The view tracks *remote* members — a node never waits on itself.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of the membership event channel. Slow subscribers observe a lag
/// error and resynchronize from a fresh snapshot.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Opaque unique identifier for a cluster member.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MemberId(Uuid);

impl MemberId {
    /// Generate a fresh random member id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events emitted on membership changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A member joined the cluster.
    Joined(MemberId),
    /// A member left the cluster (graceful departure and crash are
    /// indistinguishable at this level).
    Left(MemberId),
}

/// Tracks the remote members currently known to this node.
#[derive(Debug)]
pub struct MembershipView {
    local: MemberId,
    members: RwLock<HashSet<MemberId>>,
    events: broadcast::Sender<MembershipEvent>,
}

impl MembershipView {
    /// Create a view for the given local member. The view starts empty.
    pub fn new(local: MemberId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            local,
            members: RwLock::new(HashSet::new()),
            events,
        }
    }

    /// The local node's member id.
    pub fn local_id(&self) -> MemberId {
        self.local
    }

    /// Snapshot of the currently-known remote members.
    pub fn snapshot(&self) -> Vec<MemberId> {
        self.members.read().unwrap().iter().copied().collect()
    }

    /// Number of currently-known remote members.
    pub fn member_count(&self) -> usize {
        self.members.read().unwrap().len()
    }

    /// True if `id` is a currently-known remote member.
    pub fn contains(&self, id: MemberId) -> bool {
        self.members.read().unwrap().contains(&id)
    }

    /// Record that `id` joined the cluster. The local id and already-known
    /// members are ignored.
    pub fn join(&self, id: MemberId) {
        if id == self.local {
            return;
        }
        let inserted = self.members.write().unwrap().insert(id);
        if inserted {
            let _ = self.events.send(MembershipEvent::Joined(id));
        }
    }

    /// Record that `id` left the cluster. Unknown members are ignored.
    pub fn leave(&self, id: MemberId) {
        let removed = self.members.write().unwrap().remove(&id);
        if removed {
            let _ = self.events.send(MembershipEvent::Left(id));
        }
    }

    /// Subscribe to membership change events.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }
}
