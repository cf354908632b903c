//! Message ingestion.
//!
//! Publishing is shared by the HTTP `/post` endpoint and the memcache
//! listener: both hand over a JSON post request on behalf of a site.

use crate::handlers::AppState;
use crate::metrics;
use bytes::Bytes;
use herald_core::{auth, validate_channel_name, AuthError, Message, SiteConf};
use herald_protocol::codec::MAX_FRAME_SIZE;
use herald_protocol::{PostRequest, ProtocolError, TokenGrant};
use herald_transport::CacheBackend;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Reasons a publish request is rejected.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Unknown site {0:?}")]
    UnknownSite(String),

    #[error("Cannot decode json: {0}")]
    Decode(String),

    #[error("Invalid channel: {0}")]
    InvalidChannel(&'static str),

    #[error("Message of {0} bytes is too large")]
    TooLarge(usize),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid signature")]
    InvalidSignature,
}

impl PublishError {
    /// Metric label for the rejection.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            PublishError::UnknownSite(_) => "unknown_site",
            PublishError::Decode(_) => "decode",
            PublishError::InvalidChannel(_) => "invalid_channel",
            PublishError::TooLarge(_) => "too_large",
            PublishError::InvalidToken => "invalid_token",
            PublishError::InvalidSignature => "invalid_signature",
        }
    }
}

impl From<AuthError> for PublishError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidToken => PublishError::InvalidToken,
            AuthError::InvalidSignature => PublishError::InvalidSignature,
        }
    }
}

impl From<ProtocolError> for PublishError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Json(e) => PublishError::Decode(e.to_string()),
            other => PublishError::Decode(other.to_string()),
        }
    }
}

/// Publish the post request in `data` to a channel of `site`.
///
/// `via` labels the ingestion path in metrics.
///
/// # Errors
///
/// Returns an error if the request cannot be decoded, names an invalid
/// channel, or fails token or signature checks.
pub fn publish(
    state: &AppState,
    site: &SiteConf,
    data: &[u8],
    via: &'static str,
) -> Result<Arc<Message>, PublishError> {
    match authorize(state, site, data) {
        Ok((channel, body)) => {
            let message = state.hub.publish(&site.topic_key(&channel), body);
            metrics::record_publish(message.body().len(), via);
            debug!(site = %site.name, %channel, ord = %message.ord(), via, "Published");
            Ok(message)
        }
        Err(e) => {
            metrics::record_rejected(e.reason());
            warn!(site = %site.name, via, error = %e, "Publish rejected");
            Err(e)
        }
    }
}

fn authorize(
    state: &AppState,
    site: &SiteConf,
    data: &[u8],
) -> Result<(String, Bytes), PublishError> {
    let request = PostRequest::from_json(data)?;
    let token = request.token_bytes()?;
    let signature = request.auth_bytes()?;
    auth::authorize_post(&state.secret, &site.post_secret, &token, &signature)?;
    validate_channel_name(&request.channel).map_err(PublishError::InvalidChannel)?;

    let body = request.body();
    if body.len() > MAX_FRAME_SIZE {
        return Err(PublishError::TooLarge(body.len()));
    }
    Ok((request.channel, body))
}

/// A freshly minted token grant.
#[must_use]
pub fn token_grant(state: &AppState) -> TokenGrant {
    TokenGrant::new(&auth::mint(&state.secret), auth::TOKEN_LIFETIME_SECS)
}

/// Memcache storage semantics: `set <site>` publishes, `get token` mints.
pub struct MemcacheBackend {
    state: Arc<AppState>,
}

impl MemcacheBackend {
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl CacheBackend for MemcacheBackend {
    type Error = PublishError;

    fn store(&self, key: &str, data: &[u8]) -> Result<(), PublishError> {
        let site = self
            .state
            .sites
            .get(key)
            .ok_or_else(|| PublishError::UnknownSite(key.to_string()))?;
        publish(&self.state, &site, data, "memcache").map(|_| ())
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        if key != "token" {
            return None;
        }
        serde_json::to_vec(&token_grant(&self.state)).ok().map(Bytes::from)
    }
}
