//! Global message sequence.
//!
//! Every message gets an [`Ordinal`] from [`next_ordinal`]. Ordinals are
//! unique for the lifetime of the process and strictly increase in the order
//! the calls are serviced. They are not persisted across restarts.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_ORDINAL: AtomicI64 = AtomicI64::new(0);

/// Position of a message in the process-wide sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ordinal(i64);

impl Ordinal {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Take the next ordinal. The first value handed out is 1.
#[must_use]
pub fn next_ordinal() -> Ordinal {
    Ordinal(LAST_ORDINAL.fetch_add(1, Ordering::Relaxed) + 1)
}

/// Where a new subscription starts replaying history from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Replay only the most recent buffered message.
    Latest,
    /// Replay nothing.
    Nothing,
    /// Replay every buffered message with an ordinal greater than this one.
    After(Ordinal),
}

impl From<i64> for Cursor {
    /// Wire form: negative means latest, zero means nothing.
    fn from(after: i64) -> Self {
        match after {
            n if n < 0 => Cursor::Latest,
            0 => Cursor::Nothing,
            n => Cursor::After(Ordinal(n)),
        }
    }
}
