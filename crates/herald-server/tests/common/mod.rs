#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use herald_core::auth;
use herald_server::config::SiteSection;
use herald_server::{AppState, Config};
use std::sync::Arc;

pub const SERVER_SECRET: &[u8] = b"server-secret";
pub const SITE: &str = "acme";
pub const SITE_SECRET: &[u8] = b"site-secret";
pub const POST_SECRET: &[u8] = b"post-secret";

pub fn config() -> Config {
    let mut config = Config {
        secret: BASE64.encode(SERVER_SECRET),
        ..Config::default()
    };
    config.metrics.enabled = false;
    config.sites.insert(
        SITE.to_string(),
        SiteSection {
            secret: BASE64.encode(SITE_SECRET),
            post_secret: BASE64.encode(POST_SECRET),
        },
    );
    config
}

pub fn state(config: Config) -> Arc<AppState> {
    Arc::new(AppState::new(config).expect("state"))
}

/// A post request signed for [`SITE`].
pub fn post_body(channel: &str, message: &str) -> String {
    let token = auth::mint(SERVER_SECRET);
    format!(
        r#"{{"channel":{},"token":"{}","auth":"{}","message":{message}}}"#,
        serde_json::to_string(channel).expect("channel"),
        BASE64.encode(&token),
        BASE64.encode(auth::sign_post(POST_SECRET, &token)),
    )
}

/// Token and subscription signature for `channel`.
pub fn subscription(channel: &str) -> (Vec<u8>, Vec<u8>) {
    let token = auth::mint(SERVER_SECRET);
    let signature = auth::sign_subscription(SITE_SECRET, channel, &token);
    (token, signature)
}
