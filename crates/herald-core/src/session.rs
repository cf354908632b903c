//! Subscriber sessions.
//!
//! A [`Session`] drives one client connection. It runs three cooperating
//! parts sharing a one-shot close signal:
//!
//! - a reader task that decodes requests off the connection,
//! - a writer task that puts responses and pushed messages on it,
//! - the command loop, which handles one request at a time.
//!
//! Whatever part notices the connection is gone closes the signal and the
//! others wind down. On exit the session leaves every channel it joined.

use crate::auth::{self, AuthError};
use crate::hub::Hub;
use crate::message::{Message, Subscriber};
use crate::ord::Cursor;
use crate::site::SiteConf;
use crate::topic::validate_channel_name;
use async_trait::async_trait;
use herald_protocol::{codec, ClientFrame, RequestError, ServerFrame};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Receiving half of a connection.
#[async_trait]
pub trait FrameSource: Send + 'static {
    type Error: fmt::Display + Send;

    /// Read the next request.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection. Requests
    /// that arrived but could not be decoded are returned as `Some(Err(_))`.
    async fn recv(&mut self) -> Result<Option<Result<ClientFrame, RequestError>>, Self::Error>;
}

/// Sending half of a connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    type Error: fmt::Display + Send;

    async fn send(&mut self, frame: &ServerFrame) -> Result<(), Self::Error>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), Self::Error>;
}

/// How long a closing session waits on its reader and writer.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

static ACTIVE_SESSIONS: AtomicUsize = AtomicUsize::new(0);

/// Number of sessions currently running in this process.
#[must_use]
pub fn active_sessions() -> usize {
    ACTIVE_SESSIONS.load(Ordering::Relaxed)
}

struct ActiveSession;

impl ActiveSession {
    fn enter() -> Self {
        ACTIVE_SESSIONS.fetch_add(1, Ordering::Relaxed);
        Self
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        ACTIVE_SESSIONS.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Idempotent close signal shared by the parts of a session.
#[derive(Clone)]
struct CloseSignal(Arc<watch::Sender<bool>>);

impl CloseSignal {
    fn new() -> Self {
        Self(Arc::new(watch::Sender::new(false)))
    }

    fn close(&self) {
        self.0.send_replace(true);
    }

    async fn closed(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives as long as `self`, so this only returns once closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// One client connection bound to a site.
pub struct Session<S, K> {
    source: S,
    sink: K,
    site: Arc<SiteConf>,
    hub: Hub,
    secret: Arc<[u8]>,
}

impl<S: FrameSource, K: FrameSink> Session<S, K> {
    /// Create a session. `secret` is the server secret tokens are checked
    /// against.
    pub fn new(source: S, sink: K, site: Arc<SiteConf>, hub: Hub, secret: Arc<[u8]>) -> Self {
        Self {
            source,
            sink,
            site,
            hub,
            secret,
        }
    }

    /// Serve the connection until either side closes it.
    pub async fn run(self) {
        let _active = ActiveSession::enter();
        let Session {
            source,
            sink,
            site,
            hub,
            secret,
        } = self;
        debug!(site = %site.name, "Session started");

        let close = CloseSignal::new();
        let (request_tx, mut requests) = mpsc::channel(1);
        let (response_tx, responses) = mpsc::channel(1);
        let (subscriber, pushes) = Subscriber::channel();

        let reader = tokio::spawn(read_loop(source, request_tx, close.clone()));
        let writer = tokio::spawn(write_loop(sink, responses, pushes, close.clone()));

        let mut commands = Commands {
            site,
            hub,
            secret,
            subscriber,
            channels: HashSet::new(),
            responses: response_tx,
            close: close.clone(),
        };

        loop {
            let request = tokio::select! {
                () = close.closed() => break,
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            if !commands.dispatch(request).await {
                break;
            }
        }

        close.close();
        commands.leave_all();
        drop(commands);

        join("reader", reader).await;
        join("writer", writer).await;
        debug!("Session closed");
    }
}

async fn join(task: &'static str, mut handle: JoinHandle<()>) {
    match timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(task, error = %err, "Session task failed"),
        Err(_) => {
            debug!(task, "Session task did not stop, aborting");
            handle.abort();
        }
    }
}

struct Commands {
    site: Arc<SiteConf>,
    hub: Hub,
    secret: Arc<[u8]>,
    subscriber: Subscriber,
    channels: HashSet<String>,
    responses: mpsc::Sender<ServerFrame>,
    close: CloseSignal,
}

impl Commands {
    /// Handle one request. Returns `false` once responses can no longer be
    /// delivered.
    async fn dispatch(&mut self, request: Result<ClientFrame, RequestError>) -> bool {
        match request {
            Ok(ClientFrame::Subscribe {
                req_id,
                channel,
                after,
                token,
                auth,
            }) => self.subscribe(req_id, channel, after, &token, &auth).await,
            Ok(ClientFrame::Unsubscribe { req_id, channel }) => {
                self.unsubscribe(req_id, channel).await
            }
            Err(err) => {
                warn!(site = %self.site.name, error = %err, "Rejected request");
                let req_id = err.req_id().map(str::to_owned);
                self.respond(ServerFrame::error(req_id, err.to_string())).await
            }
        }
    }

    async fn subscribe(
        &mut self,
        req_id: Option<String>,
        channel: String,
        after: i64,
        token: &str,
        auth: &str,
    ) -> bool {
        if let Err(reason) = self.authorize(&channel, token, auth) {
            warn!(site = %self.site.name, channel = %channel, reason, "Subscription refused");
            return self.respond(ServerFrame::error(req_id, reason)).await;
        }
        if self.channels.contains(&channel) {
            return self
                .respond(ServerFrame::error(req_id, "already subscribed"))
                .await;
        }

        // The ok must be queued before any replayed message.
        if !self.respond(ServerFrame::ok(req_id)).await {
            return false;
        }
        let key = self.site.topic_key(&channel);
        let replayed = self
            .hub
            .subscribe(&key, &self.subscriber, Cursor::from(after));
        debug!(topic = %key, after, replayed, "Session subscribed");
        self.channels.insert(channel);
        true
    }

    async fn unsubscribe(&mut self, req_id: Option<String>, channel: String) -> bool {
        if !self.channels.remove(&channel) {
            return self
                .respond(ServerFrame::error(req_id, "not subscribed"))
                .await;
        }
        let key = self.site.topic_key(&channel);
        self.hub.unsubscribe(&key, self.subscriber.id());
        debug!(topic = %key, "Session unsubscribed");
        self.respond(ServerFrame::ok(req_id)).await
    }

    fn authorize(&self, channel: &str, token: &str, auth: &str) -> Result<(), &'static str> {
        validate_channel_name(channel)?;
        let token = codec::decode_bytes(token).map_err(|_| "invalid token")?;
        let auth = codec::decode_bytes(auth).map_err(|_| "invalid signature")?;
        auth::authorize_subscription(&self.secret, &self.site.secret, channel, &token, &auth)
            .map_err(|err| match err {
                AuthError::InvalidToken => "invalid token",
                AuthError::InvalidSignature => "invalid signature",
            })
    }

    /// Queue a response. Returns `false` once the session is closing.
    async fn respond(&self, frame: ServerFrame) -> bool {
        tokio::select! {
            () = self.close.closed() => false,
            sent = self.responses.send(frame) => sent.is_ok(),
        }
    }

    fn leave_all(&mut self) {
        for channel in self.channels.drain() {
            let key = self.site.topic_key(&channel);
            self.hub.unsubscribe(&key, self.subscriber.id());
            trace!(topic = %key, "Left channel on session close");
        }
    }
}

async fn read_loop<S: FrameSource>(
    mut source: S,
    requests: mpsc::Sender<Result<ClientFrame, RequestError>>,
    close: CloseSignal,
) {
    loop {
        let received = tokio::select! {
            () = close.closed() => return,
            received = source.recv() => received,
        };
        let request = match received {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("Connection closed by peer");
                close.close();
                return;
            }
            Err(err) => {
                debug!(error = %err, "Connection read error");
                close.close();
                return;
            }
        };
        tokio::select! {
            () = close.closed() => return,
            sent = requests.send(request) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn write_loop<K: FrameSink>(
    mut sink: K,
    mut responses: mpsc::Receiver<ServerFrame>,
    mut pushes: mpsc::UnboundedReceiver<Arc<Message>>,
    close: CloseSignal,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = close.closed() => break,
            Some(frame) = responses.recv() => frame,
            Some(message) = pushes.recv() => ServerFrame::push(
                message.channel(),
                message.ord().get(),
                message.body().clone(),
            ),
            else => break,
        };
        let sent = tokio::select! {
            () = close.closed() => break,
            sent = sink.send(&frame) => sent,
        };
        if let Err(err) = sent {
            debug!(error = %err, "Connection write error");
            close.close();
            break;
        }
    }
    match timeout(SHUTDOWN_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => trace!(error = %err, "Error closing connection"),
        Err(_) => debug!("Connection did not close in time"),
    }
}
