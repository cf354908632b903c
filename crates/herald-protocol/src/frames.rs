//! Frame types for the Herald protocol.
//!
//! Clients send [`ClientFrame`] requests tagged by their `request` field.
//! The server answers with [`ServerFrame`]s: either a [`Response`] to a
//! request or a [`Push`] carrying a message from a subscribed channel.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Request names the server understands.
pub const KNOWN_REQUESTS: [&str; 2] = ["subscribe", "unsubscribe"];

/// A request sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Subscribe to a channel, optionally replaying history.
    Subscribe {
        /// Request ID echoed in the response.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        /// Channel name within the connection's site.
        channel: String,
        /// Replay cursor: negative for the latest message, zero for none,
        /// positive for every message after that ord.
        #[serde(default)]
        after: i64,
        /// Base64 server token.
        token: String,
        /// Base64 HMAC over the channel name and token.
        auth: String,
    },

    /// Unsubscribe from a channel.
    Unsubscribe {
        /// Request ID echoed in the response.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        /// Channel name within the connection's site.
        channel: String,
    },
}

impl ClientFrame {
    /// Create a Subscribe frame from raw token and signature bytes.
    #[must_use]
    pub fn subscribe(
        req_id: impl Into<String>,
        channel: impl Into<String>,
        after: i64,
        token: &[u8],
        auth: &[u8],
    ) -> Self {
        ClientFrame::Subscribe {
            req_id: Some(req_id.into()),
            channel: channel.into(),
            after,
            token: BASE64.encode(token),
            auth: BASE64.encode(auth),
        }
    }

    /// Create an Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(req_id: impl Into<String>, channel: impl Into<String>) -> Self {
        ClientFrame::Unsubscribe {
            req_id: Some(req_id.into()),
            channel: channel.into(),
        }
    }

    /// The request ID, if the client supplied one.
    #[must_use]
    pub fn req_id(&self) -> Option<&str> {
        match self {
            ClientFrame::Subscribe { req_id, .. } | ClientFrame::Unsubscribe { req_id, .. } => {
                req_id.as_deref()
            }
        }
    }

    /// The channel the request targets.
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            ClientFrame::Subscribe { channel, .. } | ClientFrame::Unsubscribe { channel, .. } => {
                channel
            }
        }
    }
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Response to a client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome of the request.
    pub response: Status,
    /// ID of the request being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    /// Error reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// A channel message pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Push {
    /// Channel the message was published to.
    #[serde(rename = "message")]
    pub channel: String,
    /// Global sequence number of the message.
    pub ord: i64,
    /// Message body as published.
    pub body: Body,
}

/// Opaque message body.
///
/// Human-readable encodings embed the body verbatim when it is valid JSON
/// and fall back to a base64 string otherwise. Binary encodings carry the
/// raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body(pub Bytes);

impl Serialize for Body {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if !serializer.is_human_readable() {
            return serializer.serialize_bytes(&self.0);
        }
        let raw = std::str::from_utf8(&self.0)
            .ok()
            .and_then(|text| serde_json::from_str::<&RawValue>(text).ok());
        match raw {
            Some(raw) => raw.serialize(serializer),
            None => serializer.serialize_str(&BASE64.encode(&self.0)),
        }
    }
}

impl<'de> Deserialize<'de> for Body {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let raw = Box::<RawValue>::deserialize(deserializer)?;
            Ok(Body(Bytes::copy_from_slice(raw.get().as_bytes())))
        } else {
            let buf = serde_bytes::ByteBuf::deserialize(deserializer)?;
            Ok(Body(Bytes::from(buf.into_vec())))
        }
    }
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Answer to a request.
    Response(Response),
    /// Message from a subscribed channel.
    Push(Push),
}

impl ServerFrame {
    /// Create a success response.
    #[must_use]
    pub fn ok(req_id: Option<String>) -> Self {
        ServerFrame::Response(Response {
            response: Status::Ok,
            req_id,
            body: None,
        })
    }

    /// Create an error response.
    #[must_use]
    pub fn error(req_id: Option<String>, reason: impl Into<String>) -> Self {
        ServerFrame::Response(Response {
            response: Status::Error,
            req_id,
            body: Some(reason.into()),
        })
    }

    /// Create a push frame.
    #[must_use]
    pub fn push(channel: impl Into<String>, ord: i64, body: Bytes) -> Self {
        ServerFrame::Push(Push {
            channel: channel.into(),
            ord,
            body: Body(body),
        })
    }
}
