//! Node-loss reactor.
//!
//! Listens for membership removals and cancels any replication state this
//! node holds on behalf of the departed member: buffered transfers are
//! dropped and local file locks released, as if the member had broadcast a
//! discard and unlock before crashing. The departed member's distributed
//! mutex leases lapse on their own. Runs independently of any live barrier
//! call — the barrier's own removal handling unblocks waiting callers in
//! lockstep with this cleanup.

use crate::membership::{MembershipEvent, MembershipView};
use crate::responder::{OriginStateTracker, SyncTarget};
use crate::shutdown::ShutdownListener;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cancels in-flight replication state for departed members.
pub struct NodeLossReactor {
    membership: Arc<MembershipView>,
    tracker: Arc<OriginStateTracker>,
    target: Arc<dyn SyncTarget>,
}

impl NodeLossReactor {
    /// Subscribe to membership events and spawn the reactor loop.
    pub fn spawn(
        membership: Arc<MembershipView>,
        tracker: Arc<OriginStateTracker>,
        target: Arc<dyn SyncTarget>,
        shutdown: ShutdownListener,
    ) -> JoinHandle<()> {
        let events = membership.subscribe();
        let reactor = Self {
            membership,
            tracker,
            target,
        };
        tokio::spawn(reactor.run(events, shutdown))
    }

    async fn run(
        self,
        mut events: broadcast::Receiver<MembershipEvent>,
        mut shutdown: ShutdownListener,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(MembershipEvent::Left(member)) => self.cancel_for(member).await,
                    Ok(MembershipEvent::Joined(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "membership events lagged in node-loss reactor");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.wait() => break,
            }
        }
        debug!(local = %self.membership.local_id(), "node-loss reactor stopped");
    }

    async fn cancel_for(&self, member: crate::membership::MemberId) {
        let paths = self.tracker.drain_origin(member).await;
        if paths.is_empty() {
            return;
        }
        info!(member = %member, count = paths.len(),
              "cancelling replication state for departed member");
        for path in paths {
            if let Err(e) = self.target.discard(&path).await {
                warn!(member = %member, path = %path, error = %e,
                      "discard during node-loss cleanup failed");
            }
            if let Err(e) = self.target.unlock_local(&path).await {
                warn!(member = %member, path = %path, error = %e,
                      "unlock during node-loss cleanup failed");
            }
        }
    }
}
