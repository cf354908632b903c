//! Topics: named message endpoints with bounded, expiring history.
//!
//! A topic keeps the last `capacity` messages published to it for at most
//! `ttl`, replays part of that history to new subscribers and fans every new
//! message out to its current subscribers. A topic with neither subscribers
//! nor history hands itself back to its [`Pool`](crate::pool::Pool).

use crate::message::{Message, Subscriber, SubscriberId};
use crate::ord::Cursor;
use crate::pool::{Hibernate, Pooled};
use crate::ring::Ring;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// Validate a channel name.
///
/// # Errors
///
/// Returns a reason if the name is empty, too long or contains control
/// characters.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty channel name");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("channel name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("channel name contains control characters");
    }
    Ok(())
}

/// Topics are addressed by site and channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicKey {
    pub site: String,
    pub channel: String,
}

impl TopicKey {
    #[must_use]
    pub fn new(site: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.site, self.channel)
    }
}

/// Settings shared by every topic of a pool.
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Number of messages kept in history.
    pub capacity: usize,
    /// How long a message stays in history.
    pub ttl: Duration,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Topic errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// The instance no longer serves the requested key.
    #[error("Topic instance was recycled")]
    Recycled,
}

struct TopicState {
    key: Option<TopicKey>,
    history: Ring<Arc<Message>>,
    subscribers: HashMap<SubscriberId, Subscriber>,
    hibernate: Option<Hibernate>,
    eviction_armed: bool,
}

impl TopicState {
    fn check(&self, key: &TopicKey) -> Result<(), TopicError> {
        match &self.key {
            Some(current) if current == key => Ok(()),
            _ => Err(TopicError::Recycled),
        }
    }

    fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.history.is_empty()
    }

    fn hibernate_if_idle(&mut self) {
        if !self.is_idle() {
            return;
        }
        if let Some(hibernate) = self.hibernate.take() {
            debug!(topic = %DisplayKey(&self.key), "Topic idle, hibernating");
            self.key = None;
            hibernate.hibernate();
        }
    }
}

struct DisplayKey<'a>(&'a Option<TopicKey>);

impl fmt::Display for DisplayKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(key) => key.fmt(f),
            None => f.write_str("<dormant>"),
        }
    }
}

/// A named endpoint with history and subscribers.
///
/// Every operation takes the key the caller resolved the topic under and
/// fails with [`TopicError::Recycled`] if the instance has since been
/// hibernated or handed to another key.
pub struct Topic {
    config: TopicConfig,
    state: Mutex<TopicState>,
}

impl Topic {
    fn lock(&self) -> MutexGuard<'_, TopicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Key the topic currently serves, `None` while dormant.
    #[must_use]
    pub fn key(&self) -> Option<TopicKey> {
        self.lock().key.clone()
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    #[must_use]
    pub fn config(&self) -> &TopicConfig {
        &self.config
    }

    /// Add a subscriber, first replaying history selected by `cursor`.
    ///
    /// Returns the number of replayed messages.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Recycled`] if the topic no longer serves `key`.
    pub fn subscribe(
        &self,
        key: &TopicKey,
        subscriber: Subscriber,
        cursor: Cursor,
    ) -> Result<usize, TopicError> {
        let mut state = self.lock();
        state.check(key)?;

        let mut replayed = 0;
        let mut replay = |message: &Arc<Message>| {
            subscriber.deliver(Arc::clone(message));
            replayed += 1;
        };
        match cursor {
            Cursor::Nothing => {}
            Cursor::Latest => {
                if let Some(last) = state.history.last() {
                    replay(last);
                }
            }
            Cursor::After(ord) => {
                state
                    .history
                    .iter()
                    .filter(|message| message.ord() > ord)
                    .for_each(&mut replay);
            }
        }

        debug!(
            topic = %key,
            subscriber = subscriber.id(),
            replayed,
            "Subscribed"
        );
        state.subscribers.insert(subscriber.id(), subscriber);
        Ok(replayed)
    }

    /// Remove a subscriber. The topic hibernates if it becomes idle.
    ///
    /// Returns whether the subscriber was present.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Recycled`] if the topic no longer serves `key`.
    pub fn unsubscribe(&self, key: &TopicKey, id: SubscriberId) -> Result<bool, TopicError> {
        let mut state = self.lock();
        state.check(key)?;

        let removed = state.subscribers.remove(&id).is_some();
        if removed {
            debug!(topic = %key, subscriber = id, "Unsubscribed");
        }
        state.hibernate_if_idle();
        Ok(removed)
    }

    /// Publish a message: append it to history and deliver it to every
    /// subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Recycled`] if the topic no longer serves `key`.
    pub fn add_message(
        self: &Arc<Self>,
        key: &TopicKey,
        body: Bytes,
    ) -> Result<Arc<Message>, TopicError> {
        let mut state = self.lock();
        state.check(key)?;

        let message = Arc::new(Message::new(key.channel.as_str(), body));
        state.history.append(Arc::clone(&message));

        if !state.eviction_armed {
            self.arm_eviction(&mut state, message.created_at() + self.config.ttl);
        }

        let delivered = state
            .subscribers
            .values()
            .filter(|subscriber| subscriber.deliver(Arc::clone(&message)))
            .count();

        trace!(topic = %key, ord = %message.ord(), delivered, "Published message");
        Ok(message)
    }

    fn arm_eviction(self: &Arc<Self>, state: &mut TopicState, deadline: Instant) {
        state.eviction_armed = true;
        let topic = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(topic) = topic.upgrade() {
                topic.evict_expired();
            }
        });
    }

    fn evict_expired(self: &Arc<Self>) {
        let mut state = self.lock();
        state.eviction_armed = false;
        if state.key.is_none() {
            return;
        }

        let now = Instant::now();
        let ttl = self.config.ttl;
        let mut evicted = 0usize;
        while state
            .history
            .first()
            .is_some_and(|message| message.is_expired(ttl, now))
        {
            state.history.remove_first();
            evicted += 1;
        }
        trace!(topic = %DisplayKey(&state.key), evicted, "Evicted expired messages");

        let next_deadline = state.history.first().map(|oldest| oldest.created_at() + ttl);
        match next_deadline {
            Some(deadline) => self.arm_eviction(&mut state, deadline),
            None => state.hibernate_if_idle(),
        }
    }
}

impl Pooled for Topic {
    type Key = TopicKey;
    type Config = TopicConfig;

    fn create(key: TopicKey, hibernate: Hibernate, config: &TopicConfig) -> Self {
        Self {
            config: config.clone(),
            state: Mutex::new(TopicState {
                key: Some(key),
                history: Ring::new(config.capacity),
                subscribers: HashMap::new(),
                hibernate: Some(hibernate),
                eviction_armed: false,
            }),
        }
    }

    fn reactivate(&self, key: TopicKey, hibernate: Hibernate) {
        let mut state = self.lock();
        state.key = Some(key);
        state.hibernate = Some(hibernate);
        state.history.clean();
        state.subscribers.clear();
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Topic")
            .field("key", &state.key)
            .field("history", &state.history.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ord::Ordinal;
    use crate::pool::Pool;
    use tokio::sync::mpsc;

    fn pool(capacity: usize, ttl: Duration) -> Pool<Topic> {
        Pool::new(TopicConfig { capacity, ttl })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Arc<Message>>) -> Vec<Ordinal> {
        let mut ords = Vec::new();
        while let Ok(message) = rx.try_recv() {
            ords.push(message.ord());
        }
        ords
    }

    fn publish_five(pool: &Pool<Topic>, key: &TopicKey) -> Vec<Ordinal> {
        (0..5)
            .map(|n| {
                pool.get(key)
                    .add_message(key, Bytes::from(format!("{n}")))
                    .unwrap()
                    .ord()
            })
            .collect()
    }

    #[test]
    fn test_validate_channel_name() {
        assert!(validate_channel_name("news").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("a\nb").is_err());
        assert!(validate_channel_name(&"x".repeat(MAX_CHANNEL_NAME_LENGTH + 1)).is_err());
    }

    #[tokio::test]
    async fn test_replay_after_ordinal() {
        let pool = pool(3, Duration::from_secs(60));
        let key = TopicKey::new("site", "news");
        let ords = publish_five(&pool, &key);

        let (subscriber, mut rx) = Subscriber::channel();
        let replayed = pool
            .get(&key)
            .subscribe(&key, subscriber, Cursor::After(ords[1]))
            .unwrap();
        assert_eq!(replayed, 3);
        assert_eq!(drain(&mut rx), ords[2..].to_vec());

        let (subscriber, mut rx) = Subscriber::channel();
        pool.get(&key)
            .subscribe(&key, subscriber, Cursor::After(ords[3]))
            .unwrap();
        assert_eq!(drain(&mut rx), vec![ords[4]]);
    }

    #[tokio::test]
    async fn test_replay_latest_and_nothing() {
        let pool = pool(3, Duration::from_secs(60));
        let key = TopicKey::new("site", "news");
        let ords = publish_five(&pool, &key);
        let topic = pool.get(&key);

        let (latest, mut latest_rx) = Subscriber::channel();
        topic.subscribe(&key, latest, Cursor::Latest).unwrap();
        assert_eq!(drain(&mut latest_rx), vec![ords[4]]);

        let (nothing, mut nothing_rx) = Subscriber::channel();
        assert_eq!(topic.subscribe(&key, nothing, Cursor::Nothing).unwrap(), 0);
        assert!(drain(&mut nothing_rx).is_empty());
    }

    #[tokio::test]
    async fn test_latest_on_empty_history_replays_nothing() {
        let pool = pool(3, Duration::from_secs(60));
        let key = TopicKey::new("site", "empty");
        let (subscriber, mut rx) = Subscriber::channel();
        assert_eq!(pool.get(&key).subscribe(&key, subscriber, Cursor::Latest).unwrap(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_live_delivery_in_order() {
        let pool = pool(3, Duration::from_secs(60));
        let key = TopicKey::new("site", "live");
        let (subscriber, mut rx) = Subscriber::channel();
        pool.get(&key).subscribe(&key, subscriber, Cursor::Nothing).unwrap();

        let ords = publish_five(&pool, &key);
        assert_eq!(drain(&mut rx), ords);
    }

    #[tokio::test]
    async fn test_unsubscribe_without_history_hibernates() {
        let pool = pool(3, Duration::from_secs(60));
        let key = TopicKey::new("site", "quiet");
        let topic = pool.get(&key);
        let (subscriber, _rx) = Subscriber::channel();
        let id = subscriber.id();

        topic.subscribe(&key, subscriber, Cursor::Nothing).unwrap();
        assert!(topic.unsubscribe(&key, id).unwrap());

        assert!(!pool.contains(&key));
        assert_eq!(pool.dormant_len(), 1);
        assert_eq!(topic.key(), None);
        assert_eq!(
            topic.subscribe(&key, Subscriber::channel().0, Cursor::Nothing),
            Err(TopicError::Recycled)
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_with_history_stays_active() {
        let pool = pool(3, Duration::from_secs(60));
        let key = TopicKey::new("site", "busy");
        let topic = pool.get(&key);
        let (subscriber, _rx) = Subscriber::channel();
        let id = subscriber.id();

        topic.subscribe(&key, subscriber, Cursor::Nothing).unwrap();
        topic.add_message(&key, Bytes::from_static(b"1")).unwrap();
        assert!(topic.unsubscribe(&key, id).unwrap());

        assert!(pool.contains(&key));
        assert_eq!(pool.dormant_len(), 0);
    }

    #[tokio::test]
    async fn test_reactivated_topic_is_clean() {
        let pool = pool(3, Duration::from_secs(60));
        let old = TopicKey::new("site", "old");
        let topic = pool.get(&old);
        let (subscriber, _rx) = Subscriber::channel();
        let id = subscriber.id();
        topic.subscribe(&old, subscriber, Cursor::Nothing).unwrap();
        topic.unsubscribe(&old, id).unwrap();

        let new = TopicKey::new("site", "new");
        let reused = pool.get(&new);
        assert!(Arc::ptr_eq(&topic, &reused));
        assert_eq!(reused.key(), Some(new.clone()));
        assert_eq!(reused.history_len(), 0);
        assert_eq!(reused.subscriber_count(), 0);
        assert_eq!(reused.config().capacity, 3);
        assert_eq!(
            reused.add_message(&old, Bytes::new()).unwrap_err(),
            TopicError::Recycled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_messages_are_evicted() {
        let ttl = Duration::from_secs(10);
        let pool = pool(10, ttl);
        let key = TopicKey::new("site", "ttl");
        let topic = pool.get(&key);

        let first = topic.add_message(&key, Bytes::from_static(b"1")).unwrap();
        tokio::time::sleep(ttl / 2).await;
        let second = topic.add_message(&key, Bytes::from_static(b"2")).unwrap();

        tokio::time::sleep(ttl / 2 + Duration::from_millis(1)).await;
        assert_eq!(topic.history_len(), 1);
        let (subscriber, mut rx) = Subscriber::channel();
        topic
            .subscribe(&key, subscriber.clone(), Cursor::After(Ordinal::new(0)))
            .unwrap();
        let replayed = drain(&mut rx);
        assert!(!replayed.contains(&first.ord()));
        assert_eq!(replayed, vec![second.ord()]);
        topic.unsubscribe(&key, subscriber.id()).unwrap();
        assert!(pool.contains(&key));

        tokio::time::sleep(ttl).await;
        assert_eq!(topic.history_len(), 0);
        assert!(!pool.contains(&key));
        assert_eq!(pool.dormant_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_keeps_topic_with_subscribers() {
        let ttl = Duration::from_secs(5);
        let pool = pool(10, ttl);
        let key = TopicKey::new("site", "watched");
        let topic = pool.get(&key);
        let (subscriber, _rx) = Subscriber::channel();
        topic.subscribe(&key, subscriber, Cursor::Nothing).unwrap();
        topic.add_message(&key, Bytes::from_static(b"1")).unwrap();

        tokio::time::sleep(ttl * 2).await;
        assert_eq!(topic.history_len(), 0);
        assert!(pool.contains(&key));
    }
}
