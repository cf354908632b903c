//! Tokens and request signatures.
//!
//! A token is `expiry (u64, little endian) || HMAC-SHA256(secret, expiry)`,
//! minted with the server secret and valid for [`TOKEN_LIFETIME_SECS`].
//! Site backends prove that a client may subscribe to a channel, or that a
//! publish request is theirs, by signing the token with a per-site secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Seconds a freshly minted token stays valid.
pub const TOKEN_LIFETIME_SECS: u64 = 120;

const EXPIRY_LEN: usize = 8;
const MAC_LEN: usize = 32;

/// Length of a token in bytes.
pub const TOKEN_LEN: usize = EXPIRY_LEN + MAC_LEN;

/// Authorization failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("invalid signature")]
    InvalidSignature,
}

fn hmac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Mint a token that expires [`TOKEN_LIFETIME_SECS`] from now.
#[must_use]
pub fn mint(secret: &[u8]) -> Vec<u8> {
    mint_at(secret, unix_now())
}

/// Mint a token as if the current time were `now` (unix seconds).
#[must_use]
pub fn mint_at(secret: &[u8], now: u64) -> Vec<u8> {
    let expiry = (now + TOKEN_LIFETIME_SECS).to_le_bytes();
    let mut mac = hmac(secret);
    mac.update(&expiry);

    let mut token = Vec::with_capacity(TOKEN_LEN);
    token.extend_from_slice(&expiry);
    token.extend_from_slice(&mac.finalize().into_bytes());
    token
}

/// Check a token's MAC and expiry.
#[must_use]
pub fn verify(token: &[u8], secret: &[u8]) -> bool {
    verify_at(token, secret, unix_now())
}

/// Check a token as if the current time were `now` (unix seconds).
#[must_use]
pub fn verify_at(token: &[u8], secret: &[u8], now: u64) -> bool {
    if token.len() != TOKEN_LEN {
        return false;
    }
    let (expiry, tag) = token.split_at(EXPIRY_LEN);

    let mut mac = hmac(secret);
    mac.update(expiry);
    if mac.verify_slice(tag).is_err() {
        return false;
    }

    let mut raw = [0u8; EXPIRY_LEN];
    raw.copy_from_slice(expiry);
    now < u64::from_le_bytes(raw)
}

/// Signature a site grants for subscribing to `channel` with `token`.
#[must_use]
pub fn sign_subscription(site_secret: &[u8], channel: &str, token: &[u8]) -> Vec<u8> {
    let mut mac = hmac(site_secret);
    mac.update(channel.as_bytes());
    mac.update(token);
    mac.finalize().into_bytes().to_vec()
}

/// Signature a site grants for publishing with `token`.
#[must_use]
pub fn sign_post(post_secret: &[u8], token: &[u8]) -> Vec<u8> {
    let mut mac = hmac(post_secret);
    mac.update(token);
    mac.finalize().into_bytes().to_vec()
}

/// Authorize a subscription request.
///
/// # Errors
///
/// [`AuthError::InvalidToken`] if the token is forged or expired,
/// [`AuthError::InvalidSignature`] if `auth` was not produced by the site.
pub fn authorize_subscription(
    server_secret: &[u8],
    site_secret: &[u8],
    channel: &str,
    token: &[u8],
    auth: &[u8],
) -> Result<(), AuthError> {
    if !verify(token, server_secret) {
        return Err(AuthError::InvalidToken);
    }
    let mut mac = hmac(site_secret);
    mac.update(channel.as_bytes());
    mac.update(token);
    mac.verify_slice(auth).map_err(|_| AuthError::InvalidSignature)
}

/// Authorize a publish request.
///
/// # Errors
///
/// Same as [`authorize_subscription`], checked against the site's post secret.
pub fn authorize_post(
    server_secret: &[u8],
    post_secret: &[u8],
    token: &[u8],
    auth: &[u8],
) -> Result<(), AuthError> {
    if !verify(token, server_secret) {
        return Err(AuthError::InvalidToken);
    }
    let mut mac = hmac(post_secret);
    mac.update(token);
    mac.verify_slice(auth).map_err(|_| AuthError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"server-secret";

    #[test]
    fn test_fresh_token_verifies() {
        let token = mint(SECRET);
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(verify(&token, SECRET));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let token = mint(SECRET);
        assert!(!verify(&token, b"other-secret"));
    }

    #[test]
    fn test_expired_token_fails() {
        let now = 1_700_000_000;
        let token = mint_at(SECRET, now);
        assert!(verify_at(&token, SECRET, now + TOKEN_LIFETIME_SECS - 1));
        assert!(!verify_at(&token, SECRET, now + TOKEN_LIFETIME_SECS));
        assert!(!verify_at(&token, SECRET, now + TOKEN_LIFETIME_SECS + 1));
    }

    #[test]
    fn test_tampered_token_fails() {
        let mut token = mint(SECRET);
        token[0] ^= 0x01;
        assert!(!verify(&token, SECRET));

        let mut token = mint(SECRET);
        token[TOKEN_LEN - 1] ^= 0x80;
        assert!(!verify(&token, SECRET));
    }

    #[test]
    fn test_wrong_length_fails() {
        let token = mint(SECRET);
        assert!(!verify(&token[..TOKEN_LEN - 1], SECRET));
        assert!(!verify(&[], SECRET));
    }

    #[test]
    fn test_token_layout() {
        let token = mint_at(SECRET, 1000);
        assert_eq!(&token[..8], &(1000 + TOKEN_LIFETIME_SECS).to_le_bytes());
    }

    #[test]
    fn test_subscription_authorization() {
        let token = mint(SECRET);
        let auth = sign_subscription(b"site", "news", &token);

        assert_eq!(
            authorize_subscription(SECRET, b"site", "news", &token, &auth),
            Ok(())
        );
        assert_eq!(
            authorize_subscription(SECRET, b"site", "sport", &token, &auth),
            Err(AuthError::InvalidSignature)
        );
        assert_eq!(
            authorize_subscription(SECRET, b"other", "news", &token, &auth),
            Err(AuthError::InvalidSignature)
        );
        assert_eq!(
            authorize_subscription(b"wrong", b"site", "news", &token, &auth),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_post_authorization() {
        let token = mint(SECRET);
        let auth = sign_post(b"post", &token);

        assert_eq!(authorize_post(SECRET, b"post", &token, &auth), Ok(()));
        assert_eq!(
            authorize_post(SECRET, b"site", &token, &auth),
            Err(AuthError::InvalidSignature)
        );
        assert_eq!(
            authorize_post(SECRET, b"post", b"short", &auth),
            Err(AuthError::InvalidToken)
        );
    }
}
