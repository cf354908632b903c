//! WebSocket adapter.
//!
//! Splits an upgraded axum [`WebSocket`] into a [`WebSocketSource`] and a
//! [`WebSocketSink`] that a [`Session`](herald_core::Session) can drive.
//!
//! Each websocket message carries one frame. Requests are accepted as JSON
//! text or MessagePack binary messages; responses and pushes use the
//! encoding negotiated for the connection.
//!
//! The sink pings the peer every heartbeat interval. The source expects a
//! pong within two intervals and fails with [`TransportError::Timeout`]
//! otherwise.

use crate::traits::TransportError;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use herald_core::{FrameSink, FrameSource};
use herald_protocol::{codec, ClientFrame, Encoding, RequestError, ServerFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Split a socket into a frame source and a frame sink.
///
/// Must be called from within a tokio runtime: the sink spawns the
/// keep-alive task.
pub fn split(
    socket: WebSocket,
    encoding: Encoding,
    heartbeat: Duration,
) -> (WebSocketSource, WebSocketSink) {
    let heartbeat = heartbeat.max(Duration::from_millis(1));
    let (sink, stream) = socket.split();
    let sink = Arc::new(Mutex::new(sink));
    let keepalive = tokio::spawn(keepalive(Arc::clone(&sink), heartbeat));

    let source = WebSocketSource {
        stream,
        timeout: heartbeat * 2,
        deadline: Instant::now() + heartbeat * 2,
    };
    let sink = WebSocketSink {
        sink,
        encoding,
        keepalive,
    };
    (source, sink)
}

async fn keepalive(sink: SharedSink, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        trace!("Ping");
        if let Err(e) = sink.lock().await.send(Message::Ping(Vec::new())).await {
            debug!(error = %e, "Ping failed");
            return;
        }
    }
}

/// Receiving half of a websocket connection.
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
    timeout: Duration,
    deadline: Instant,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    type Error = TransportError;

    async fn recv(&mut self) -> Result<Option<Result<ClientFrame, RequestError>>, TransportError> {
        loop {
            let next = timeout_at(self.deadline, self.stream.next())
                .await
                .map_err(|_| TransportError::Timeout)?;

            match next {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(codec::decode_request(text.as_bytes(), Encoding::Json)));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(codec::decode_request(&data, Encoding::MessagePack)));
                }
                Some(Ok(Message::Pong(_))) => {
                    trace!("Pong");
                    self.deadline = Instant::now() + self.timeout;
                }
                Some(Ok(Message::Ping(_))) => {
                    // Answered by the websocket layer.
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

/// Sending half of a websocket connection.
///
/// Dropping the sink stops the keep-alive pings.
pub struct WebSocketSink {
    sink: SharedSink,
    encoding: Encoding,
    keepalive: JoinHandle<()>,
}

impl WebSocketSink {
    fn message(&self, frame: &ServerFrame) -> Result<Message, TransportError> {
        let data = codec::encode(frame, self.encoding)?;
        if self.encoding.is_text() {
            let text = String::from_utf8(data.to_vec())
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
            Ok(Message::Text(text))
        } else {
            Ok(Message::Binary(data.to_vec()))
        }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    type Error = TransportError;

    async fn send(&mut self, frame: &ServerFrame) -> Result<(), TransportError> {
        let message = match self.message(frame) {
            Ok(message) => message,
            Err(TransportError::Protocol(e)) => {
                // Oversized frames are dropped so the rest of the stream survives.
                warn!(error = %e, "Dropping frame that cannot be encoded");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.keepalive.abort();
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

impl Drop for WebSocketSink {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}
