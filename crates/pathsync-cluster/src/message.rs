//! Wire messages for the replication protocol.
//!
//! Requests are broadcast on one topic per operation; every member answers
//! with an [`Ack`] on the request topic's ack twin. The embedded
//! [`LogicalPath`] is the correlation key on both sides.

use crate::membership::MemberId;
use crate::path::LogicalPath;
use serde::{Deserialize, Serialize};

/// Request topic names, one per broadcast operation.
pub mod topics {
    /// Acquire the node-local file lock for a path.
    pub const LOCK: &str = "pathsync/lock";
    /// Release the node-local file lock for a path.
    pub const UNLOCK: &str = "pathsync/unlock";
    /// Delete a path on every node.
    pub const DELETE: &str = "pathsync/delete";
    /// Stream change bytes for a locked path.
    pub const TRANSFER: &str = "pathsync/transfer";
    /// Commit the streamed bytes for a locked path.
    pub const STORE: &str = "pathsync/store";
    /// Drop the streamed bytes for a locked path.
    pub const DISCARD: &str = "pathsync/discard";

    /// All request topics, in protocol order.
    pub const ALL: [&str; 6] = [LOCK, UNLOCK, DELETE, TRANSFER, STORE, DISCARD];
}

/// The ack topic paired with a request topic.
pub fn ack_topic(request_topic: &str) -> String {
    format!("{request_topic}/ack")
}

/// Operation payload of a broadcast request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Take the node-local file lock for the path.
    Lock,
    /// Release the node-local file lock for the path. Must be tolerated for
    /// paths that are not locked (unlocks may race local bookkeeping).
    Unlock,
    /// Delete the path locally.
    Delete,
    /// Append a chunk of change bytes for the in-flight write.
    Transfer {
        /// Raw change bytes.
        bytes: Vec<u8>,
    },
    /// Commit the buffered bytes for the path.
    Store {
        /// SHA-256 digest of the complete payload, verified before commit.
        checksum: Vec<u8>,
    },
    /// Drop the buffered bytes for the path.
    Discard {
        /// The originator's description of why the change was abandoned.
        reason: String,
    },
}

impl RequestBody {
    /// The request topic this body is broadcast on.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Lock => topics::LOCK,
            Self::Unlock => topics::UNLOCK,
            Self::Delete => topics::DELETE,
            Self::Transfer { .. } => topics::TRANSFER,
            Self::Store { .. } => topics::STORE,
            Self::Discard { .. } => topics::DISCARD,
        }
    }
}

/// A broadcast protocol request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Member that originated the request.
    pub origin: MemberId,
    /// Path the request applies to; also the response correlation key.
    pub path: LogicalPath,
    /// Operation payload.
    pub body: RequestBody,
}

impl Request {
    /// Build a request originating from `origin` for `path`.
    pub fn new(origin: MemberId, path: LogicalPath, body: RequestBody) -> Self {
        Self { origin, path, body }
    }

    /// The request topic this message is broadcast on.
    pub fn topic(&self) -> &'static str {
        self.body.topic()
    }
}

/// One member's acknowledgement of a broadcast request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Member that processed the request.
    pub member: MemberId,
    /// Path the ack correlates to.
    pub path: LogicalPath,
    /// `None` on success, or the member's failure reason.
    pub failure: Option<String>,
}

impl Ack {
    /// A successful ack from `member` for `path`.
    pub fn success(member: MemberId, path: LogicalPath) -> Self {
        Self {
            member,
            path,
            failure: None,
        }
    }

    /// A failed ack from `member` for `path` with the given reason.
    pub fn failure(member: MemberId, path: LogicalPath, reason: impl Into<String>) -> Self {
        Self {
            member,
            path,
            failure: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_topic_mapping() {
        assert_eq!(RequestBody::Lock.topic(), topics::LOCK);
        assert_eq!(RequestBody::Unlock.topic(), topics::UNLOCK);
        assert_eq!(RequestBody::Delete.topic(), topics::DELETE);
        assert_eq!(
            RequestBody::Transfer { bytes: vec![1] }.topic(),
            topics::TRANSFER
        );
        assert_eq!(
            RequestBody::Store { checksum: vec![] }.topic(),
            topics::STORE
        );
        assert_eq!(
            RequestBody::Discard {
                reason: "err".into()
            }
            .topic(),
            topics::DISCARD
        );
    }

    #[test]
    fn test_ack_topic_pairing() {
        assert_eq!(ack_topic(topics::LOCK), "pathsync/lock/ack");
        assert_eq!(ack_topic(topics::STORE), "pathsync/store/ack");
    }

    #[test]
    fn test_wire_roundtrip() {
        let req = Request::new(
            MemberId::random(),
            LogicalPath::new("dir", "f"),
            RequestBody::Transfer {
                bytes: vec![1, 2, 3],
            },
        );
        let buf = bincode::serialize(&req).unwrap();
        let back: Request = bincode::deserialize(&buf).unwrap();
        assert_eq!(back, req);
    }
}
