//! Server configuration.
//!
//! Configuration is layered from:
//! - the first TOML file found among `$HERALD_CONFIG`, `herald.toml`,
//!   `/etc/herald/herald.toml` and `~/.config/herald/herald.toml`
//! - environment variables prefixed with `HERALD__`, using `__` as the
//!   nesting separator (`HERALD__HISTORY__SIZE=50`)
//!
//! Secrets are base64 encoded.

use anyhow::{bail, ensure, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use herald_core::{SiteConf, Sites, TopicConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

const CONFIG_PATHS: [&str; 3] = [
    "herald.toml",
    "/etc/herald/herald.toml",
    "~/.config/herald/herald.toml",
];

const RESERVED_PATHS: [&str; 4] = ["/post", "/token", "/stats", "/health"];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address of the memcache listener, disabled when unset.
    #[serde(default)]
    pub memcache_listen: Option<String>,

    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Base64 server secret that tokens are minted with.
    #[serde(default)]
    pub secret: String,

    /// Per-topic history settings.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Sites by name.
    #[serde(default)]
    pub sites: BTreeMap<String, SiteSection>,
}

/// Per-topic history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages kept per topic.
    #[serde(default = "default_history_size")]
    pub size: usize,

    /// Message lifetime in milliseconds.
    #[serde(default = "default_history_ttl")]
    pub ttl_ms: u64,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds. Connections that stay silent for two
    /// intervals are closed.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Secrets of one site.
#[derive(Clone, Serialize, Deserialize)]
pub struct SiteSection {
    /// Base64 key for subscription signatures.
    pub secret: String,
    /// Base64 key for publish signatures.
    pub post_secret: String,
}

impl std::fmt::Debug for SiteSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteSection").finish_non_exhaustive()
    }
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_history_size() -> usize {
    100
}

fn default_history_ttl() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_heartbeat_interval() -> u64 {
    60_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            memcache_listen: None,
            log_level: default_log_level(),
            secret: String::new(),
            history: HistoryConfig::default(),
            transport: TransportConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            sites: BTreeMap::new(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            size: default_history_size(),
            ttl_ms: default_history_ttl(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

fn decode_secret(what: &str, value: &str) -> Result<Vec<u8>> {
    let secret = BASE64
        .decode(value.trim())
        .with_context(|| format!("{what} is not valid base64"))?;
    ensure!(!secret.is_empty(), "{what} is empty");
    Ok(secret)
}

impl Config {
    /// Load and validate configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be parsed or the result
    /// fails validation.
    pub fn load() -> Result<Self> {
        let file = Self::locate();
        let config = Self::load_from(file.as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `file` (if any) layered with the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(::config::Environment::with_prefix("HERALD").separator("__"));

        let source = match file {
            Some(path) => path.display().to_string(),
            None => "environment".to_string(),
        };
        builder
            .build()
            .with_context(|| format!("Failed to read configuration from {source}"))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse configuration from {source}"))
    }

    fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        if let Some(addr) = &self.memcache_listen {
            addr.parse::<SocketAddr>()
                .with_context(|| format!("Invalid memcache_listen address {addr:?}"))?;
        }
        EnvFilter::try_new(&self.log_level)
            .with_context(|| format!("Invalid log_level {:?}", self.log_level))?;
        ensure!(self.history.size > 0, "history.size must be positive");
        ensure!(self.heartbeat.interval_ms > 0, "heartbeat.interval_ms must be positive");
        let ws_path = self.transport.websocket_path.as_str();
        if !ws_path.starts_with('/') {
            bail!("transport.websocket_path must start with '/'");
        }
        if RESERVED_PATHS.contains(&ws_path) {
            bail!("transport.websocket_path {ws_path:?} collides with a built-in route");
        }
        self.server_secret()?;
        self.sites()?;
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Decoded server secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is missing or not valid base64.
    pub fn server_secret(&self) -> Result<Vec<u8>> {
        decode_secret("secret", &self.secret)
    }

    /// Decoded site registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any site secret is missing or not valid base64.
    pub fn sites(&self) -> Result<Sites> {
        self.sites
            .iter()
            .map(|(name, section)| {
                Ok(SiteConf::new(
                    name.as_str(),
                    decode_secret(&format!("sites.{name}.secret"), &section.secret)?,
                    decode_secret(&format!("sites.{name}.post_secret"), &section.post_secret)?,
                ))
            })
            .collect()
    }

    /// Settings for every topic.
    #[must_use]
    pub fn topic_config(&self) -> TopicConfig {
        TopicConfig {
            capacity: self.history.size,
            ttl: Duration::from_millis(self.history.ttl_ms),
        }
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config {
            secret: BASE64.encode(b"server"),
            ..Config::default()
        };
        config.sites.insert(
            "example".to_string(),
            SiteSection {
                secret: BASE64.encode(b"sub"),
                post_secret: BASE64.encode(b"post"),
            },
        );
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.history.size, 100);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert!(config.memcache_listen.is_none());
    }

    #[test]
    fn test_config_bind_addr() {
        let addr = Config::default().bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000
            memcache_listen = "127.0.0.1:11211"
            secret = "c2VjcmV0"

            [history]
            size = 10
            ttl_ms = 5000

            [sites.example]
            secret = "c3Vi"
            post_secret = "cG9zdA=="
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.history.size, 10);
        assert_eq!(config.topic_config().ttl, Duration::from_secs(5));
        config.validate().unwrap();

        let sites = config.sites().unwrap();
        let site = sites.get("example").unwrap();
        assert_eq!(site.secret, b"sub");
        assert_eq!(site.post_secret, b"post");
        assert_eq!(config.server_secret().unwrap(), b"secret");
    }

    #[test]
    fn test_validation_failures() {
        valid().validate().unwrap();

        let mut config = valid();
        config.history.size = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.secret = "not base64!".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.secret = String::new();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.heartbeat.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.memcache_listen = Some("nowhere".to_string());
        assert!(config.validate().is_err());

        let mut config = valid();
        config.transport.websocket_path = "/post".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sites.get_mut("example").unwrap().post_secret = "%%%".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("herald-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("herald.toml");
        std::fs::write(&path, "port = 9100\nsecret = \"c2VjcmV0\"\n").unwrap();

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.history.size, 100);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
