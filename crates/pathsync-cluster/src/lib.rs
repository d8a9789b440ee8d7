#![warn(missing_docs)]

//! PathSync cluster coordination: distributed path locks and the
//! broadcast-and-await replication protocol.
//!
//! A writer acquires a cluster-wide exclusive lock on a logical path,
//! streams byte changes to every other node, and has every node commit or
//! discard the change before the lock is released. Coordination is built on
//! a per-key lease-based distributed mutex and a response barrier over
//! pairwise pub/sub — no replicated log, no leader election.

pub mod barrier;
pub mod bus;
pub mod checksum;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod dlock;
pub mod error;
pub mod lock_manager;
pub mod membership;
pub mod message;
pub mod path;
pub mod reactor;
pub mod registry;
pub mod responder;
pub mod shutdown;
