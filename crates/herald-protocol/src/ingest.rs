//! Request and response bodies for message ingestion.
//!
//! The same [`PostRequest`] JSON document is accepted by the HTTP POST
//! endpoint and by the memcache listener.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::codec::{decode_bytes, encode_bytes, ProtocolError};

/// A request to publish a message.
#[derive(Debug, Deserialize, Serialize)]
pub struct PostRequest {
    /// Target channel within the request's site.
    pub channel: String,
    /// Base64 server token.
    pub token: String,
    /// Base64 HMAC over the token, keyed by the site's post secret.
    pub auth: String,
    /// Message body, kept verbatim.
    pub message: Box<RawValue>,
}

impl PostRequest {
    /// Parse a post request from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid post request.
    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Decoded token bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not valid base64.
    pub fn token_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        decode_bytes(&self.token)
    }

    /// Decoded signature bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is not valid base64.
    pub fn auth_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        decode_bytes(&self.auth)
    }

    /// The message body as raw bytes.
    #[must_use]
    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(self.message.get().as_bytes())
    }
}

/// Result of an ingestion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostResponse {
    /// `ok` or `error`.
    pub status: String,
    /// Error description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PostResponse {
    /// A success response.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            message: None,
        }
    }

    /// An error response.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }
}

/// A freshly minted token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// Base64 token.
    pub token: String,
    /// Token lifetime in seconds.
    pub expires: u64,
}

impl TokenGrant {
    /// Create a grant from raw token bytes.
    #[must_use]
    pub fn new(token: &[u8], expires: u64) -> Self {
        Self {
            token: encode_bytes(token),
            expires,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_request_keeps_raw_message() {
        let req = PostRequest::from_json(
            br#"{"channel":"c","token":"AQI=","auth":"AwQ=","message":{"k": [1, 2]}}"#,
        )
        .unwrap();
        assert_eq!(req.channel, "c");
        assert_eq!(req.token_bytes().unwrap(), vec![1, 2]);
        assert_eq!(req.auth_bytes().unwrap(), vec![3, 4]);
        assert_eq!(&req.body()[..], br#"{"k": [1, 2]}"#);
    }

    #[test]
    fn test_post_request_missing_message() {
        assert!(PostRequest::from_json(br#"{"channel":"c","token":"","auth":""}"#).is_err());
    }

    #[test]
    fn test_post_response_shape() {
        assert_eq!(
            serde_json::to_string(&PostResponse::ok()).unwrap(),
            r#"{"status":"ok"}"#
        );
        assert_eq!(
            serde_json::to_string(&PostResponse::error("Invalid token")).unwrap(),
            r#"{"status":"error","message":"Invalid token"}"#
        );
    }
}
