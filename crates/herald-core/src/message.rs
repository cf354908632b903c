//! Message and subscriber types.
//!
//! Messages are immutable once created and shared between a topic's history
//! and its subscribers behind an `Arc`.

use crate::ord::{next_ordinal, Ordinal};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A published message.
#[derive(Debug)]
pub struct Message {
    channel: String,
    ord: Ordinal,
    created_at: Instant,
    body: Bytes,
}

impl Message {
    /// Create a message, taking the next ordinal from the global sequence.
    #[must_use]
    pub fn new(channel: impl Into<String>, body: Bytes) -> Self {
        Self {
            channel: channel.into(),
            ord: next_ordinal(),
            created_at: Instant::now(),
            body,
        }
    }

    /// Name of the channel the message was published to.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn ord(&self) -> Ordinal {
        self.ord
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Opaque message body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the message has lived for at least `ttl` at `now`.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}

/// Identifies a subscriber within a topic.
pub type SubscriberId = u64;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// A handle topics use to deliver messages to one receiver.
///
/// Delivery is a non-blocking push into the receiver's own queue, so it
/// never stalls the publishing topic and preserves per-topic order.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    sender: mpsc::UnboundedSender<Arc<Message>>,
}

impl Subscriber {
    /// Create a subscriber together with the queue it delivers into.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Arc<Message>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscriber = Self {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            sender,
        };
        (subscriber, receiver)
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Queue a message. Returns `false` if the receiver is gone.
    pub fn deliver(&self, message: Arc<Message>) -> bool {
        self.sender.send(message).is_ok()
    }
}
