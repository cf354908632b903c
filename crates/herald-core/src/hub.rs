//! Message hub.
//!
//! The hub is the entry point publishers and sessions use to reach topics.
//! It resolves topics through the pool and retries when an instance is
//! recycled between lookup and use.

use crate::message::{Message, Subscriber, SubscriberId};
use crate::ord::Cursor;
use crate::pool::Pool;
use crate::topic::{Topic, TopicConfig, TopicError, TopicKey};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, trace};

/// Handle to the pool of topics. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    topics: Pool<Topic>,
}

impl Hub {
    /// Create a hub whose topics use `config`.
    #[must_use]
    pub fn new(config: TopicConfig) -> Self {
        info!(
            capacity = config.capacity,
            ttl = ?config.ttl,
            "Creating hub"
        );
        Self {
            topics: Pool::new(config),
        }
    }

    /// Settings shared by all topics.
    #[must_use]
    pub fn config(&self) -> &TopicConfig {
        self.topics.config()
    }

    /// The topic currently serving `key`, created or reactivated on demand.
    #[must_use]
    pub fn topic(&self, key: &TopicKey) -> Arc<Topic> {
        self.topics.get(key)
    }

    /// Publish `body` to the topic at `key`.
    pub fn publish(&self, key: &TopicKey, body: Bytes) -> Arc<Message> {
        self.resolve(key, |topic| topic.add_message(key, body.clone()))
    }

    /// Subscribe to the topic at `key`, replaying history per `cursor`.
    ///
    /// Returns the number of replayed messages.
    pub fn subscribe(&self, key: &TopicKey, subscriber: &Subscriber, cursor: Cursor) -> usize {
        self.resolve(key, |topic| topic.subscribe(key, subscriber.clone(), cursor))
    }

    /// Remove a subscriber from the topic at `key`.
    ///
    /// Returns whether it was subscribed.
    pub fn unsubscribe(&self, key: &TopicKey, id: SubscriberId) -> bool {
        // A subscribed topic is never dormant, so there is nothing to do for
        // keys without a live instance.
        if !self.topics.contains(key) {
            return false;
        }
        self.resolve(key, |topic| topic.unsubscribe(key, id))
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            active_topics: self.topics.active_len(),
            dormant_topics: self.topics.dormant_len(),
        }
    }

    fn resolve<R>(
        &self,
        key: &TopicKey,
        mut op: impl FnMut(&Arc<Topic>) -> Result<R, TopicError>,
    ) -> R {
        loop {
            let topic = self.topics.get(key);
            match op(&topic) {
                Ok(value) => return value,
                Err(TopicError::Recycled) => {
                    trace!(topic = %key, "Topic recycled during lookup, retrying");
                }
            }
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Topics currently serving a key.
    pub active_topics: usize,
    /// Topics parked for reuse.
    pub dormant_topics: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hub() -> Hub {
        Hub::new(TopicConfig {
            capacity: 8,
            ttl: Duration::from_secs(60),
        })
    }

    #[tokio::test]
    async fn test_hub_publish_subscribe() {
        let hub = hub();
        let key = TopicKey::new("site", "news");

        let (sub1, mut rx1) = Subscriber::channel();
        let (sub2, mut rx2) = Subscriber::channel();
        hub.subscribe(&key, &sub1, Cursor::Nothing);
        hub.subscribe(&key, &sub2, Cursor::Nothing);

        let message = hub.publish(&key, Bytes::from_static(b"\"hello\""));
        assert_eq!(rx1.try_recv().unwrap().ord(), message.ord());
        assert_eq!(rx2.try_recv().unwrap().ord(), message.ord());
        assert_eq!(message.channel(), "news");
    }

    #[tokio::test]
    async fn test_hub_sites_are_isolated() {
        let hub = hub();
        let (subscriber, mut rx) = Subscriber::channel();
        hub.subscribe(&TopicKey::new("alpha", "news"), &subscriber, Cursor::Nothing);

        hub.publish(&TopicKey::new("beta", "news"), Bytes::from_static(b"1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hub_unsubscribe_recycles_topic() {
        let hub = hub();
        let key = TopicKey::new("site", "news");
        let (subscriber, _rx) = Subscriber::channel();

        hub.subscribe(&key, &subscriber, Cursor::Nothing);
        assert_eq!(hub.stats().active_topics, 1);

        assert!(hub.unsubscribe(&key, subscriber.id()));
        assert!(!hub.unsubscribe(&key, subscriber.id()));
        assert_eq!(
            hub.stats(),
            HubStats {
                active_topics: 0,
                dormant_topics: 1,
            }
        );

        let other = TopicKey::new("site", "other");
        hub.subscribe(&other, &subscriber, Cursor::Nothing);
        assert_eq!(hub.stats().dormant_topics, 0);
        assert_eq!(hub.topic(&other).key(), Some(other));
    }

    #[tokio::test]
    async fn test_hub_retries_on_recycled_instance() {
        let hub = hub();
        let key = TopicKey::new("site", "news");
        let (subscriber, _rx) = Subscriber::channel();

        let stale = hub.topic(&key);
        stale.subscribe(&key, subscriber.clone(), Cursor::Nothing).unwrap();
        stale.unsubscribe(&key, subscriber.id()).unwrap();
        assert_eq!(stale.key(), None);

        let message = hub.publish(&key, Bytes::from_static(b"1"));
        assert_eq!(hub.topic(&key).history_len(), 1);
        assert_eq!(message.channel(), "news");
    }
}
