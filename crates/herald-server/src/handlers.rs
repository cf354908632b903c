//! HTTP handlers for the Herald server.
//!
//! Routes:
//!
//! - `GET <websocket_path>?site=<name>[&encoding=msgpack]` - subscriber session
//! - `POST /post?site=<name>` - publish a message
//! - `GET /token?site=<name>` - mint a token
//! - `GET /stats` - runtime statistics
//! - `GET /health` - liveness probe

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::publish::{self, MemcacheBackend, PublishError};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use herald_core::{active_sessions, Hub, Session, SiteConf, Sites};
use herald_protocol::{Encoding, PostResponse, TokenGrant};
use herald_transport::{websocket, ConnectionId, MemcacheListener};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How often hub and session gauges are refreshed.
const STATE_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// Topic hub.
    pub hub: Hub,
    /// Configured sites.
    pub sites: Sites,
    /// Server secret tokens are minted with.
    pub secret: Arc<[u8]>,
    /// Server configuration.
    pub config: Config,
    started_at: Instant,
}

impl AppState {
    /// Create new app state.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured secrets cannot be decoded.
    pub fn new(config: Config) -> Result<Self> {
        let sites = config.sites()?;
        let secret: Arc<[u8]> = config.server_secret()?.into();
        Ok(Self {
            hub: Hub::new(config.topic_config()),
            sites,
            secret,
            config,
            started_at: Instant::now(),
        })
    }

    fn site(&self, name: &str) -> Result<Arc<SiteConf>, PublishError> {
        self.sites.get(name).ok_or_else(|| {
            debug!(site = name, "Unknown site");
            PublishError::UnknownSite(name.to_string())
        })
    }
}

/// Query parameters naming the site a request acts for.
#[derive(Debug, Default, Deserialize)]
pub struct SiteQuery {
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub encoding: Option<String>,
}

impl IntoResponse for PublishError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(PostResponse::error(self.to_string()))).into_response()
    }
}

/// Build the router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/post", post(post_handler))
        .route("/token", get(token_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(middleware::map_response(no_cache))
        .with_state(state)
}

/// Run the HTTP/WebSocket server and, when configured, the memcache listener.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config)?);
    let config = &state.config;

    // Start metrics server if enabled
    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => spawn_state_reporter(state.hub.clone()),
            Err(e) => error!("Failed to start metrics server: {:#}", e),
        }
    }

    if let Some(addr) = &config.memcache_listen {
        let listener = MemcacheListener::bind(addr.as_str())
            .await
            .with_context(|| format!("Failed to bind memcache listener on {addr}"))?;
        info!("Memcache listener on {}", listener.local_addr()?);
        let backend = Arc::new(MemcacheBackend::new(Arc::clone(&state)));
        tokio::spawn(listener.serve(backend));
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Herald server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );
    info!(sites = state.sites.len(), "Serving sites");

    axum::serve(listener, app(Arc::clone(&state))).await?;

    Ok(())
}

fn spawn_state_reporter(hub: Hub) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATE_REPORT_INTERVAL);
        loop {
            ticker.tick().await;
            metrics::record_state(hub.stats());
        }
    });
}

async fn no_cache(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    response
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Runtime statistics.
#[derive(Debug, Serialize, Deserialize)]
pub struct Stats {
    /// Seconds since the server started.
    pub uptime: u64,
    /// Running subscriber sessions.
    pub sessions: usize,
    pub active_topics: usize,
    pub dormant_topics: usize,
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<Stats> {
    let hub = state.hub.stats();
    Json(Stats {
        uptime: state.started_at.elapsed().as_secs(),
        sessions: active_sessions(),
        active_topics: hub.active_topics,
        dormant_topics: hub.dormant_topics,
    })
}

async fn token_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SiteQuery>,
) -> Result<Json<TokenGrant>, PublishError> {
    state.site(&query.site)?;
    Ok(Json(publish::token_grant(&state)))
}

async fn post_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SiteQuery>,
    body: Bytes,
) -> Result<Json<PostResponse>, PublishError> {
    let site = state.site(&query.site)?;
    publish::publish(&state, &site, &body, "http")?;
    Ok(Json(PostResponse::ok()))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SiteQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let site = match state.site(&query.site) {
        Ok(site) => site,
        Err(e) => return e.into_response(),
    };
    let Some(ws) = ws else {
        return (
            StatusCode::BAD_REQUEST,
            Json(PostResponse::error("Expected websocket upgrade")),
        )
            .into_response();
    };
    let encoding = Encoding::from_param(query.encoding.as_deref());

    ws.on_failed_upgrade(|e| {
        warn!(error = %e, "WebSocket upgrade failed");
        metrics::record_error("upgrade");
    })
    .on_upgrade(move |socket| handle_websocket(socket, state, site, encoding))
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    site: Arc<SiteConf>,
    encoding: Encoding,
) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = ConnectionId::generate();
    let span = info_span!("session", connection = %connection_id, site = %site.name);

    let (source, sink) = websocket::split(socket, encoding, state.config.heartbeat_interval());
    Session::new(source, sink, site, state.hub.clone(), Arc::clone(&state.secret))
        .run()
        .instrument(span)
        .await;
}
