//! Shared transport types.
//!
//! Connection-level errors and identifiers, plus the [`CacheBackend`] trait
//! the memcache listener delegates storage commands to.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:x}", self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The peer stopped answering keep-alive pings.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] herald_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage semantics behind the memcache listener.
pub trait CacheBackend: Send + Sync + 'static {
    /// Reported to the client as `CLIENT_ERROR <reason>`.
    type Error: fmt::Display + Send;

    /// Handle a `set`, `add` or `replace` of `data` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is rejected.
    fn store(&self, key: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Look up `key`. `None` is reported as a miss.
    fn get(&self, key: &str) -> Option<Bytes>;
}
