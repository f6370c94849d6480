//! WebSocket transport
//!
//! One persistent connection carries whole snapshots as JSON text frames in
//! both directions. `poll` owns the connection: it connects, pumps inbound
//! frames, pings on an interval and reconnects with backoff. `send` writes
//! through the live connection and fails fast when there is none.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::protocol::HEADER_AUTH_TOKEN;
use super::stats::{StatsSnapshot, TransportStats};
use super::{deliver, prepare_outbound, Client, Result, TransportConfig, TransportError};
use crate::auth::Identity;
use crate::clipboard::Snapshot;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Write half of the live connection
struct Link {
    sink: WsSink,

    /// Raised by a failed write so the pump reconnects
    dead: Arc<Notify>,
}

/// Why a connection's pump returned
#[derive(Debug, PartialEq, Eq)]
enum PumpExit {
    Cancelled,
    Lost,
    ReceiverGone,
}

/// WebSocket client
pub struct WebSocketClient {
    url: String,
    identity: Arc<Identity>,
    config: TransportConfig,
    stats: TransportStats,
    link: Mutex<Option<Link>>,
    online: watch::Sender<bool>,
}

impl WebSocketClient {
    /// Create a client. `http(s)://` endpoints are rewritten to `ws(s)://`.
    pub fn new(endpoint: &str, identity: Arc<Identity>, config: TransportConfig) -> Result<Self> {
        let url = stream_url(endpoint)?;
        let (online, _) = watch::channel(false);

        Ok(Self {
            url,
            identity,
            config,
            stats: TransportStats::default(),
            link: Mutex::new(None),
            online,
        })
    }

    /// Counters for this client
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether a connection is currently established
    pub fn is_connected(&self) -> bool {
        *self.online.borrow()
    }

    async fn connect(&self) -> Result<WsStream> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(ws_error)?;

        let token = HeaderValue::from_str(&self.identity.auth_token()).map_err(|e| {
            TransportError::WebSocket {
                message: format!("invalid auth header: {e}"),
            }
        })?;
        request.headers_mut().insert(HEADER_AUTH_TOKEN, token);

        let (stream, _response) = timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| match e {
                tungstenite::Error::Http(ref resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                    TransportError::Unauthorized
                }
                other => ws_error(other),
            })?;

        Ok(stream)
    }

    /// Forget the link owned by the pump that raised `dead`. A link set up
    /// by a later connection is left alone.
    async fn drop_link(&self, dead: &Arc<Notify>) {
        let mut guard = self.link.lock().await;
        if guard
            .as_ref()
            .is_some_and(|link| Arc::ptr_eq(&link.dead, dead))
        {
            *guard = None;
            self.online.send_replace(false);
        }
    }

    /// Read frames until the connection is lost or `cancel` fires
    async fn pump(
        &self,
        mut source: WsSource,
        dead: Arc<Notify>,
        cancel: &CancellationToken,
        out: &mpsc::Sender<Snapshot>,
    ) -> PumpExit {
        let period = self.config.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut unanswered = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return PumpExit::Cancelled,
                _ = dead.notified() => {
                    debug!("Write failure reported, dropping connection");
                    return PumpExit::Lost;
                }
                _ = keepalive.tick() => {
                    if unanswered >= self.config.max_missed_pongs {
                        self.stats.keepalive_timed_out();
                        warn!("No pong for {} keep-alive intervals, reconnecting", unanswered);
                        return PumpExit::Lost;
                    }
                    unanswered += 1;
                    if let Err(e) = self.write(WsMessage::Ping(Default::default())).await {
                        debug!("Ping failed: {}", e);
                        return PumpExit::Lost;
                    }
                }
                frame = source.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !self.receive(text.as_bytes(), cancel, out).await {
                            return PumpExit::ReceiverGone;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        if !self.receive(&data, cancel, out).await {
                            return PumpExit::ReceiverGone;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => unanswered = 0,
                    // answered by tungstenite on the next write
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!("Relay closed the connection: {:?}", frame);
                        return PumpExit::Lost;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read failed: {}", e);
                        return PumpExit::Lost;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        return PumpExit::Lost;
                    }
                },
            }
        }
    }

    /// Decode one frame and pass it on. Undecodable frames are dropped.
    async fn receive(
        &self,
        payload: &[u8],
        cancel: &CancellationToken,
        out: &mpsc::Sender<Snapshot>,
    ) -> bool {
        match serde_json::from_slice::<Snapshot>(payload) {
            Ok(snapshot) => {
                deliver(snapshot, self.identity.device_id(), &self.stats, out, cancel).await
            }
            Err(e) => {
                warn!("Discarding undecodable frame of {} bytes: {}", payload.len(), e);
                true
            }
        }
    }

    /// Write one frame on the live link within the write deadline.
    ///
    /// A failed write tears that link down and wakes its pump. The lock is
    /// held throughout, so the link dropped is the one written to.
    async fn write(&self, message: WsMessage) -> Result<()> {
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let error = match timeout(self.config.write_timeout, link.sink.send(message)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => ws_error(e),
            Err(_) => TransportError::Timeout,
        };

        if let Some(link) = guard.take() {
            link.dead.notify_one();
        }
        self.online.send_replace(false);
        Err(error)
    }

    /// Send a normal close frame and give the relay a moment to answer
    async fn close_gracefully(&self) {
        let Some(mut link) = self.link.lock().await.take() else {
            return;
        };
        self.online.send_replace(false);

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client shutdown".into(),
        };
        match timeout(self.config.close_grace, link.sink.send(WsMessage::Close(Some(frame)))).await {
            Ok(Ok(())) => debug!("Close frame sent"),
            Ok(Err(e)) => debug!("Close frame failed: {}", e),
            Err(_) => debug!("Close frame timed out"),
        }
        let _ = timeout(self.config.close_grace, link.sink.close()).await;
    }
}

#[async_trait]
impl Client for WebSocketClient {
    async fn send(&self, snapshot: Snapshot) -> Result<()> {
        let body = prepare_outbound(snapshot, self.config.max_body_size)?;

        let mut online = self.online.subscribe();
        let up = matches!(
            timeout(self.config.write_timeout, online.wait_for(|up| *up)).await,
            Ok(Ok(_))
        );
        if !up {
            return Err(TransportError::NotConnected);
        }

        let size = body.len();
        match self.write(WsMessage::Text(body.into())).await {
            Ok(()) => {
                self.stats.chunk_sent();
                debug!("Sent snapshot of {} bytes", size);
                Ok(())
            }
            Err(TransportError::NotConnected) => Err(TransportError::NotConnected),
            Err(e) => {
                self.stats.send_failed();
                warn!("Snapshot write failed, connection dropped: {}", e);
                Err(e)
            }
        }
    }

    async fn poll(&self, cancel: CancellationToken, out: mpsc::Sender<Snapshot>) {
        info!("Streaming from {} as {}", self.url, self.identity.device_id());
        let mut backoff = Backoff::new(self.config.reconnect.clone());

        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                connected = self.connect() => connected,
            };

            match connected {
                Ok(stream) => {
                    info!("Connected to relay at {}", self.url);
                    backoff.reset();

                    let (sink, source) = stream.split();
                    let dead = Arc::new(Notify::new());
                    *self.link.lock().await = Some(Link {
                        sink,
                        dead: dead.clone(),
                    });
                    self.online.send_replace(true);

                    match self.pump(source, dead.clone(), &cancel, &out).await {
                        PumpExit::Cancelled => break,
                        PumpExit::ReceiverGone => {
                            self.close_gracefully().await;
                            info!("Stream loop stopped");
                            return;
                        }
                        PumpExit::Lost => {
                            self.drop_link(&dead).await;
                            self.stats.reconnected();
                        }
                    }
                }
                Err(e) => warn!("Connecting to {} failed: {}", self.url, e),
            }

            let delay = backoff.next_delay();
            debug!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.close_gracefully().await;
        info!("Stream loop stopped");
    }
}

/// Normalize an endpoint to a `ws://` or `wss://` URL
fn stream_url(endpoint: &str) -> Result<String> {
    let invalid = |reason: &str| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| invalid("missing scheme"))?;
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        _ => return Err(invalid("scheme must be ws, wss, http or https")),
    };
    if rest.is_empty() {
        return Err(invalid("missing host"));
    }

    Ok(format!("{scheme}://{rest}"))
}

fn ws_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::ConnectionClosed
        }
        other => TransportError::WebSocket {
            message: other.to_string(),
        },
    }
}
