//! # herald-protocol
//!
//! Wire protocol definitions for the Herald pub/sub broker.
//!
//! This crate defines the frames exchanged over a subscriber connection,
//! the codecs used to put them on the wire, and the ingestion documents
//! accepted by the publish endpoints.
//!
//! ## Frame Types
//!
//! - `subscribe` / `unsubscribe` - Channel membership requests
//! - Response - `ok` / `error` answer to a request
//! - Push - A message delivered from a subscribed channel
//!
//! ## Example
//!
//! ```rust
//! use herald_protocol::{codec, ClientFrame, Encoding};
//!
//! let frame = ClientFrame::unsubscribe("1", "chat:lobby");
//!
//! let encoded = codec::encode(&frame, Encoding::Json).unwrap();
//! let decoded = codec::decode_request(&encoded, Encoding::Json).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod ingest;

pub use codec::{decode, decode_request, encode, Encoding, ProtocolError, RequestError};
pub use frames::{Body, ClientFrame, Push, Response, ServerFrame, Status};
pub use ingest::{PostRequest, PostResponse, TokenGrant};
