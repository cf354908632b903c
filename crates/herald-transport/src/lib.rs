//! # herald-transport
//!
//! Connection adapters for the Herald pub/sub broker.
//!
//! - **WebSocket** - Frame source and sink for subscriber sessions, with
//!   keep-alive pings
//! - **Memcache** - Text-protocol listener for publishing from backends
//!
//! ## Serving a session
//!
//! ```rust,ignore
//! use herald_transport::websocket;
//!
//! async fn on_upgrade(socket: WebSocket, site: Arc<SiteConf>, hub: Hub, secret: Arc<[u8]>) {
//!     let (source, sink) = websocket::split(socket, Encoding::Json, Duration::from_secs(60));
//!     Session::new(source, sink, site, hub, secret).run().await;
//! }
//! ```

pub mod memcache;
pub mod traits;
pub mod websocket;

pub use memcache::MemcacheListener;
pub use traits::{CacheBackend, ConnectionId, TransportError};
pub use websocket::{WebSocketSink, WebSocketSource};
