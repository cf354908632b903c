//! # herald-core
//!
//! Topic engine for the Herald pub/sub broker.
//!
//! - **Ring** - Fixed-capacity history buffer
//! - **Ordinal** - Process-wide message sequence
//! - **Pool** - Keyed object pool with hibernation
//! - **Topic** - Named endpoint with expiring history and subscribers
//! - **Hub** - Topic lookup for publishers and sessions
//! - **Auth** - Tokens and request signatures
//! - **Session** - One subscriber connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│     Hub     │────▶│    Pool     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   ▲                   │
//!        │                   │                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Subscriber  │◀────│  Publisher  │     │    Topic    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod auth;
pub mod hub;
pub mod message;
pub mod ord;
pub mod pool;
pub mod ring;
pub mod session;
pub mod site;
pub mod topic;

pub use auth::AuthError;
pub use hub::{Hub, HubStats};
pub use message::{Message, Subscriber, SubscriberId};
pub use ord::{next_ordinal, Cursor, Ordinal};
pub use pool::{Hibernate, Pool, Pooled};
pub use ring::Ring;
pub use session::{active_sessions, FrameSink, FrameSource, Session};
pub use site::{SiteConf, Sites};
pub use topic::{validate_channel_name, Topic, TopicConfig, TopicError, TopicKey};
