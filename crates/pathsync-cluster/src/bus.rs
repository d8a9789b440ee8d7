//! Named-topic pub/sub carrying protocol messages between nodes.
//!
//! In production this fronts the cluster messaging substrate. In tests and
//! the demo it is an in-process fan-out shared by every simulated node, the
//! same stand-in role the paired conduit plays for the gRPC transport in
//! cross-site replication.

use crate::error::BusError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default per-topic channel capacity.
const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// Bincode-encoded topic bus. Topics are created lazily on first use.
#[derive(Debug)]
pub struct TopicBus {
    topics: RwLock<HashMap<String, broadcast::Sender<Bytes>>>,
    capacity: usize,
}

impl TopicBus {
    /// Create a bus with the given per-topic channel capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        if let Some(tx) = self.topics.read().unwrap().get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write().unwrap();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish a message to `topic`. Publishing to a topic with no live
    /// subscribers is not an error; the message is simply dropped.
    pub fn publish<T: Serialize>(&self, topic: &str, msg: &T) -> Result<(), BusError> {
        let buf = bincode::serialize(msg).map_err(|source| BusError::Encode {
            topic: topic.to_string(),
            source,
        })?;
        if self.sender(topic).send(Bytes::from(buf)).is_err() {
            debug!(topic, "publish with no subscribers, message dropped");
        }
        Ok(())
    }

    /// Subscribe to `topic`, decoding each message as `T`. Messages published
    /// before the subscription are not replayed.
    pub fn subscribe<T: DeserializeOwned>(&self, topic: &str) -> Subscription<T> {
        Subscription {
            topic: topic.to_string(),
            rx: self.sender(topic).subscribe(),
            _marker: PhantomData,
        }
    }
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

/// A live subscription to one topic. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    topic: String,
    rx: broadcast::Receiver<Bytes>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Subscription<T> {
    /// Receive the next decodable message, or `None` once the topic closes.
    /// Undecodable messages and lag gaps are skipped with a warning.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(buf) => match bincode::deserialize(&buf) {
                    Ok(msg) => return Some(msg),
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "dropping undecodable message");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "subscriber lagged, messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u64,
    }

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let bus = TopicBus::default();
        let mut sub = bus.subscribe::<Ping>("t");
        bus.publish("t", &Ping { seq: 7 }).unwrap();
        assert_eq!(sub.recv().await, Some(Ping { seq: 7 }));
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let bus = TopicBus::default();
        bus.publish("t", &Ping { seq: 1 }).unwrap();
        let mut sub = bus.subscribe::<Ping>("t");
        bus.publish("t", &Ping { seq: 2 }).unwrap();
        assert_eq!(sub.recv().await, Some(Ping { seq: 2 }));
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = TopicBus::default();
        let mut sub_a = bus.subscribe::<Ping>("a");
        let _sub_b = bus.subscribe::<Ping>("b");
        bus.publish("b", &Ping { seq: 9 }).unwrap();
        bus.publish("a", &Ping { seq: 1 }).unwrap();
        assert_eq!(sub_a.recv().await, Some(Ping { seq: 1 }));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = TopicBus::default();
        assert!(bus.publish("empty", &Ping { seq: 0 }).is_ok());
    }
}
