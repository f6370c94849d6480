//! Network transports between this client and the relay
//!
//! Both transports implement [`Client`]: `send` uploads one snapshot and
//! `poll` streams snapshots published by other clients until cancelled.
//! Retry, reconnect and backoff policy stays inside each transport.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod backoff;
pub mod chunk;
pub mod poll;
pub mod protocol;
pub mod stats;
pub mod websocket;


pub use backoff::{Backoff, BackoffConfig, RetryPolicy};
pub use chunk::{ChunkError, ChunkSet};
pub use poll::HttpPollClient;
pub use protocol::DiscoverResponse;
pub use stats::{StatsSnapshot, TransportStats};
pub use websocket::WebSocketClient;

use crate::auth::Identity;
use crate::clipboard::Snapshot;

/// Transport layer errors with user-friendly messages
#[derive(Debug, Error)]
pub enum TransportError {
    /// Serialized snapshot over the body cap
    #[error("CR001: Snapshot of {size} bytes exceeds the {limit} byte limit, dropped.")]
    TooLarge { size: usize, limit: usize },

    /// Non-success HTTP status
    #[error("CR002: Relay answered HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Relay rejected the auth token
    #[error("CR003: Relay rejected the auth token. Check that every client uses the same shared key and that clocks are in sync.")]
    Unauthorized,

    /// HTTP request could not be completed
    #[error("CR004: Request to relay failed: {0}")]
    Request(#[from] reqwest::Error),

    /// WebSocket protocol error
    #[error("CR005: WebSocket error: {message}")]
    WebSocket { message: String },

    /// No live stream connection
    #[error("CR006: Not connected to the relay. The receive loop may still be reconnecting.")]
    NotConnected,

    /// Operation exceeded its deadline
    #[error("CR007: Operation timed out.")]
    Timeout,

    /// Connection closed underneath us
    #[error("CR008: Connection to the relay closed unexpectedly.")]
    ConnectionClosed,

    /// Endpoint URL cannot be used by this transport
    #[error("CR009: Invalid relay endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Snapshot (de)serialization failed
    #[error("CR010: Data format error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Relay flushed the session; discovery must restart
    #[error("CR011: Session {cid} is gone from the relay.")]
    SessionGone { cid: String },

    /// Chunk not stored yet
    #[error("CR012: Chunk {index} of session {cid} is not available yet.")]
    NotYetAvailable { cid: String, index: usize },
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport-agnostic client contract
#[async_trait]
pub trait Client: Send + Sync {
    /// Upload one snapshot. Safe to call while `poll` runs.
    async fn send(&self, snapshot: Snapshot) -> Result<()>;

    /// Forward snapshots from other clients into `out` until `cancel` fires
    async fn poll(&self, cancel: CancellationToken, out: mpsc::Sender<Snapshot>);
}

/// Which transport to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Chunked HTTP polling
    #[default]
    Poll,

    /// Persistent WebSocket
    #[serde(alias = "ws")]
    Stream,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Poll => f.write_str("poll"),
            TransportKind::Stream => f.write_str("stream"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "poll" | "http" => Ok(TransportKind::Poll),
            "stream" | "ws" | "websocket" => Ok(TransportKind::Stream),
            other => Err(format!("unknown transport '{other}' (expected poll or stream)")),
        }
    }
}

/// Configuration for transport layer
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest serialized snapshot accepted (default: 32 MiB)
    pub max_body_size: usize,

    /// Part ceiling agreed with the relay (default: 300 KiB)
    pub chunk_size: usize,

    /// Per-request timeout for HTTP calls (default: 15 seconds)
    pub request_timeout: Duration,

    /// Chunk upload retry policy
    pub retry: RetryPolicy,

    /// Pause between poll iterations (default: 200 ms)
    pub poll_idle: Duration,

    /// Stream connection timeout (default: 10 seconds)
    pub connect_timeout: Duration,

    /// Per-write deadline on the stream (default: 5 seconds)
    pub write_timeout: Duration,

    /// Keep-alive interval (default: 25 seconds)
    pub keepalive_interval: Duration,

    /// Unanswered pings before the stream is declared dead
    pub max_missed_pongs: u32,

    /// Stream reconnect schedule
    pub reconnect: BackoffConfig,

    /// Time granted to a graceful close on shutdown
    pub close_grace: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_body_size: crate::MAX_PAYLOAD_SIZE,
            chunk_size: chunk::DEFAULT_CHUNK_SIZE,
            request_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            poll_idle: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(25),
            max_missed_pongs: 2,
            reconnect: BackoffConfig::reconnect(),
            close_grace: Duration::from_secs(1),
        }
    }
}

/// Build the transport selected by `kind`
pub fn build_client(
    kind: TransportKind,
    endpoint: &str,
    identity: Arc<Identity>,
    config: TransportConfig,
) -> Result<Arc<dyn Client>> {
    Ok(match kind {
        TransportKind::Poll => Arc::new(HttpPollClient::new(endpoint, identity, config)?),
        TransportKind::Stream => Arc::new(WebSocketClient::new(endpoint, identity, config)?),
    })
}

/// Stamp the quick key and serialize, enforcing the body cap before any I/O
pub fn prepare_outbound(mut snapshot: Snapshot, max_body_size: usize) -> Result<String> {
    snapshot.stamp_quick_key();
    let body = serde_json::to_string(&snapshot)?;
    if body.len() > max_body_size {
        return Err(TransportError::TooLarge {
            size: body.len(),
            limit: max_body_size,
        });
    }
    Ok(body)
}

/// Whether a received snapshot should reach the application.
///
/// Self-originated snapshots would echo back into our own clipboard, and
/// empty ones carry nothing to apply.
pub(crate) fn should_forward(snapshot: &Snapshot, local_id: &str) -> bool {
    snapshot.origin != local_id && !snapshot.is_empty()
}

/// Filter and hand one received snapshot downstream.
///
/// Returns `false` once the receive loop should stop: cancelled, or nobody
/// is listening any more.
pub(crate) async fn deliver(
    snapshot: Snapshot,
    local_id: &str,
    stats: &TransportStats,
    out: &mpsc::Sender<Snapshot>,
    cancel: &CancellationToken,
) -> bool {
    if !should_forward(&snapshot, local_id) {
        stats.snapshot_filtered();
        debug!(
            "Ignoring snapshot from {} with {} items",
            snapshot.origin,
            snapshot.items.len()
        );
        return true;
    }

    stats.snapshot_received();
    info!(
        "Received snapshot from {} ({} items)",
        snapshot.origin,
        snapshot.items.len()
    );

    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = out.send(snapshot) => {
            if sent.is_err() {
                warn!("Snapshot receiver dropped, stopping receive loop");
            }
            sent.is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.max_body_size, 32 * 1024 * 1024);
        assert_eq!(config.chunk_size, 300 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.poll_idle, Duration::from_millis(200));
        assert_eq!(config.keepalive_interval, Duration::from_secs(25));
        assert_eq!(config.max_missed_pongs, 2);
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(500));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(8));
    }

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!("poll".parse::<TransportKind>(), Ok(TransportKind::Poll));
        assert_eq!("ws".parse::<TransportKind>(), Ok(TransportKind::Stream));
        assert_eq!("Stream".parse::<TransportKind>(), Ok(TransportKind::Stream));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::Stream.to_string(), "stream");
    }
}
