//! Codec for encoding and decoding Herald frames.
//!
//! Each websocket message carries exactly one frame, so no length prefix is
//! needed. JSON frames travel as text messages and MessagePack frames as
//! binary messages.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frames::{ClientFrame, KNOWN_REQUESTS};

/// Maximum accepted frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Invalid base64 field.
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A client request that could not be turned into a [`ClientFrame`].
///
/// These are answered with an error response; they never end the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The `request` field names a command the server does not know.
    #[error("unknown request {name:?}")]
    Unknown {
        req_id: Option<String>,
        name: String,
    },

    /// The frame could not be decoded.
    #[error("malformed request: {reason}")]
    Malformed {
        req_id: Option<String>,
        reason: String,
    },

    /// The frame is larger than [`MAX_FRAME_SIZE`].
    #[error("request of {0} bytes is too large")]
    TooLarge(usize),
}

impl RequestError {
    /// The request ID, when it could be recovered from the frame.
    #[must_use]
    pub fn req_id(&self) -> Option<&str> {
        match self {
            RequestError::Unknown { req_id, .. } | RequestError::Malformed { req_id, .. } => {
                req_id.as_deref()
            }
            RequestError::TooLarge(_) => None,
        }
    }
}

/// Frame encoding negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// JSON text frames.
    #[default]
    Json,
    /// MessagePack binary frames with named fields.
    MessagePack,
}

impl Encoding {
    /// Pick an encoding from a query parameter value.
    ///
    /// Anything other than `msgpack` selects JSON.
    #[must_use]
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("msgpack") => Encoding::MessagePack,
            _ => Encoding::Json,
        }
    }

    /// Whether frames in this encoding are sent as text.
    #[must_use]
    pub fn is_text(self) -> bool {
        matches!(self, Encoding::Json)
    }
}

/// Fields recovered from a request that failed typed decoding.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    request: Option<String>,
    #[serde(default)]
    req_id: Option<String>,
}

/// Encode a value in the given encoding.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode<T: Serialize>(value: &T, encoding: Encoding) -> Result<Bytes, ProtocolError> {
    let payload = match encoding {
        Encoding::Json => serde_json::to_vec(value)?,
        Encoding::MessagePack => rmp_serde::to_vec_named(value)?,
    };

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode a value from the given encoding.
///
/// # Errors
///
/// Returns an error if the data is too large or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8], encoding: Encoding) -> Result<T, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let value = match encoding {
        Encoding::Json => serde_json::from_slice(data)?,
        Encoding::MessagePack => rmp_serde::from_slice(data)?,
    };
    Ok(value)
}

/// Decode a client request.
///
/// # Errors
///
/// Returns a [`RequestError`] describing why the request was rejected,
/// carrying its `req_id` when one could be recovered.
pub fn decode_request(data: &[u8], encoding: Encoding) -> Result<ClientFrame, RequestError> {
    match decode::<ClientFrame>(data, encoding) {
        Ok(frame) => Ok(frame),
        Err(ProtocolError::FrameTooLarge(size)) => Err(RequestError::TooLarge(size)),
        Err(e) => {
            let envelope: Envelope = decode(data, encoding).unwrap_or_default();
            match envelope.request {
                Some(name) if !KNOWN_REQUESTS.contains(&name.as_str()) => {
                    Err(RequestError::Unknown {
                        req_id: envelope.req_id,
                        name,
                    })
                }
                _ => Err(RequestError::Malformed {
                    req_id: envelope.req_id,
                    reason: e.to_string(),
                }),
            }
        }
    }
}

/// Base64-encode a binary field.
#[must_use]
pub fn encode_bytes(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode a base64 binary field.
///
/// # Errors
///
/// Returns an error if the field is not valid standard base64.
pub fn decode_bytes(field: &str) -> Result<Vec<u8>, ProtocolError> {
    Ok(BASE64.decode(field)?)
}
