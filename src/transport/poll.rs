//! Chunked HTTP polling transport
//!
//! `send` splits the serialized snapshot into parts and POSTs them one by one
//! under a fresh session id, retrying each part on its own. `poll` repeatedly
//! discovers the relay's active session, fetches the parts it does not hold
//! yet and emits the snapshot once every part has arrived.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode, Url};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::chunk::{self, ChunkSet};
use super::protocol::{
    self, DiscoverResponse, HEADER_AUTH_TOKEN, HEADER_CHUNK_ID, HEADER_CHUNK_IDX,
    HEADER_CHUNK_TOTAL, HEADER_DEVICE_ID,
};
use super::stats::{StatsSnapshot, TransportStats};
use super::{deliver, prepare_outbound, Client, Result, TransportConfig, TransportError};
use crate::auth::Identity;
use crate::clipboard::Snapshot;

/// Longest relay error body kept in [`TransportError::Http`]
const MAX_ERROR_BODY: usize = 256;

/// HTTP polling client
pub struct HttpPollClient {
    url: Url,
    http: reqwest::Client,
    identity: Arc<Identity>,
    config: TransportConfig,
    stats: TransportStats,
}

impl HttpPollClient {
    /// Create a client for an `http://` or `https://` endpoint
    pub fn new(endpoint: &str, identity: Arc<Identity>, config: TransportConfig) -> Result<Self> {
        let url = Url::parse(endpoint).map_err(|e| TransportError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: format!("scheme '{}' is not http or https", url.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("cliprelay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            url,
            http,
            identity,
            config,
            stats: TransportStats::default(),
        })
    }

    /// Counters for this client
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Request with the headers every call carries. A fresh token per request
    /// keeps the timestamp inside the relay's skew window.
    fn request(&self, method: Method) -> RequestBuilder {
        self.http
            .request(method, self.url.clone())
            .header(HEADER_AUTH_TOKEN, self.identity.auth_token())
            .header(HEADER_DEVICE_ID, self.identity.device_id())
    }

    async fn post_chunk(&self, cid: &str, index: usize, total: usize, part: Bytes) -> Result<()> {
        let resp = self
            .request(Method::POST)
            .header(HEADER_CHUNK_ID, cid)
            .header(HEADER_CHUNK_IDX, index.to_string())
            .header(HEADER_CHUNK_TOTAL, total.to_string())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(part)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(())
    }

    /// Upload one part, retrying transient failures with backoff.
    ///
    /// Parts are idempotent on the relay, so a retry after a lost response
    /// only overwrites the stored copy.
    async fn post_chunk_with_retry(
        &self,
        cid: &str,
        index: usize,
        total: usize,
        part: Bytes,
    ) -> Result<()> {
        let policy = &self.config.retry;
        let mut backoff = Backoff::new(policy.backoff.clone());
        let mut attempt = 1;

        loop {
            match self.post_chunk(cid, index, total, part.clone()).await {
                Ok(()) => {
                    self.stats.chunk_sent();
                    return Ok(());
                }
                Err(e) if attempt >= policy.max_attempts.max(1) => {
                    self.stats.send_failed();
                    warn!(
                        "Giving up on chunk {}/{} of session {} after {} attempts: {}",
                        index + 1,
                        total,
                        cid,
                        attempt,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    self.stats.send_retried();
                    warn!(
                        "Chunk {}/{} of session {} failed (attempt {}), retrying in {:?}: {}",
                        index + 1,
                        total,
                        cid,
                        attempt,
                        delay,
                        e
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Ask the relay for its active session
    pub async fn discover(&self) -> Result<DiscoverResponse> {
        let resp = self.request(Method::GET).send().await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// Fetch one stored part
    pub async fn fetch_chunk(&self, cid: &str, index: usize) -> Result<Bytes> {
        let resp = self
            .request(Method::GET)
            .header(HEADER_CHUNK_ID, cid)
            .header(HEADER_CHUNK_IDX, index.to_string())
            .send()
            .await?;

        match resp.status() {
            status if status.is_success() => Ok(resp.bytes().await?),
            StatusCode::NOT_FOUND => Err(TransportError::NotYetAvailable {
                cid: cid.to_string(),
                index,
            }),
            StatusCode::GONE => Err(TransportError::SessionGone {
                cid: cid.to_string(),
            }),
            _ => Err(status_error(resp).await),
        }
    }

    /// Fetch whatever the relay advertises for the tracked session and
    /// return the snapshot once it is complete.
    async fn advance(&self, download: &mut Download, meta: &DiscoverResponse) -> Option<Snapshot> {
        let set = download.track(meta, &self.stats)?;
        let cid = set.cid().to_string();
        let wanted: Vec<usize> = set.missing(&meta.have).collect();

        for index in wanted {
            match self.fetch_chunk(&cid, index).await {
                Ok(data) if data.len() > self.config.chunk_size => {
                    self.stats.fetch_failed();
                    warn!(
                        "Discarding chunk {} of session {}: {} bytes exceeds the {} byte part limit",
                        index,
                        cid,
                        data.len(),
                        self.config.chunk_size
                    );
                }
                Ok(data) => {
                    if let Err(e) = set.insert(index, data) {
                        warn!("Discarding chunk of session {}: {}", cid, e);
                    }
                }
                Err(TransportError::SessionGone { .. }) => {
                    info!("Session {} was flushed by the relay", cid);
                    download.abandon();
                    return None;
                }
                Err(e) => {
                    self.stats.fetch_failed();
                    debug!("Fetching chunk {} of session {} failed: {}", index, cid, e);
                }
            }
        }

        if !set.is_complete() {
            debug!(
                "Session {}: {} of {} chunks",
                cid,
                set.len(),
                set.total()
            );
            return None;
        }

        let complete = download.finish()?;
        match complete.assemble() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Discarding session {}: {}", complete.cid(), e);
                None
            }
        }
    }
}

#[async_trait]
impl Client for HttpPollClient {
    async fn send(&self, snapshot: Snapshot) -> Result<()> {
        let body = Bytes::from(prepare_outbound(snapshot, self.config.max_body_size)?);
        let parts = chunk::split(&body, self.config.chunk_size);
        let cid = protocol::new_session_id();
        let total = parts.len();

        debug!(
            "Uploading {} bytes as {} chunks in session {}",
            body.len(),
            total,
            cid
        );

        for (index, part) in parts.into_iter().enumerate() {
            self.post_chunk_with_retry(&cid, index, total, part).await?;
        }

        info!("Uploaded session {} ({} chunks)", cid, total);
        Ok(())
    }

    async fn poll(&self, cancel: CancellationToken, out: mpsc::Sender<Snapshot>) {
        info!("Polling {} as {}", self.url, self.identity.device_id());
        let mut download = Download::default();

        loop {
            let discovered = tokio::select! {
                _ = cancel.cancelled() => break,
                discovered = self.discover() => discovered,
            };

            match discovered {
                Ok(meta) => {
                    let received = tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = self.advance(&mut download, &meta) => received,
                    };

                    if let Some(snapshot) = received {
                        let local_id = self.identity.device_id();
                        if !deliver(snapshot, local_id, &self.stats, &out, &cancel).await {
                            break;
                        }
                    }
                }
                Err(e) => {
                    self.stats.discover_failed();
                    debug!("Discover failed: {}", e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.config.poll_idle) => {}
            }
        }

        info!("Poll loop stopped");
    }
}

/// Turn a non-success response into a transport error
async fn status_error(resp: Response) -> TransportError {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return TransportError::Unauthorized;
    }

    let body = resp.text().await.unwrap_or_default();
    TransportError::Http {
        status: status.as_u16(),
        body: body.trim().chars().take(MAX_ERROR_BODY).collect(),
    }
}

/// Receive-side session state.
///
/// Holds at most one partially received session plus the id of the last one
/// emitted, so a session the relay keeps advertising is delivered once.
#[derive(Debug, Default)]
struct Download {
    current: Option<ChunkSet>,
    completed: Option<String>,
}

impl Download {
    /// Align with what the relay advertises and return the set to fill
    fn track(&mut self, meta: &DiscoverResponse, stats: &TransportStats) -> Option<&mut ChunkSet> {
        if !meta.is_active() {
            if let Some(stale) = self.current.take() {
                debug!("Session {} is no longer advertised", stale.cid());
            }
            return None;
        }

        if self.completed.as_deref() == Some(meta.cid.as_str()) {
            return None;
        }

        let restart = match &self.current {
            Some(set) if set.cid() == meta.cid => {
                if set.total() != meta.total {
                    warn!(
                        "Session {} changed its chunk total from {} to {}, restarting",
                        meta.cid,
                        set.total(),
                        meta.total
                    );
                }
                set.total() != meta.total
            }
            Some(set) => {
                // latest wins: the relay only keeps the newest session anyway
                if !set.is_empty() {
                    stats.session_superseded();
                    warn!(
                        "Session {} superseded by {} with {} of {} chunks received",
                        set.cid(),
                        meta.cid,
                        set.len(),
                        set.total()
                    );
                }
                true
            }
            None => true,
        };

        if restart {
            self.current = Some(ChunkSet::new(meta.cid.clone(), meta.total));
        }
        self.current.as_mut()
    }

    /// Take the tracked set and remember it as delivered
    fn finish(&mut self) -> Option<ChunkSet> {
        let set = self.current.take()?;
        self.completed = Some(set.cid().to_string());
        Some(set)
    }

    fn abandon(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(cid: &str, total: usize, have: &[usize]) -> DiscoverResponse {
        DiscoverResponse {
            cid: cid.to_string(),
            total,
            have: have.to_vec(),
        }
    }

    fn identity() -> Arc<Identity> {
        Arc::new(Identity::new("dev00001", "0123456789abcdef").unwrap())
    }

    #[test]
    fn test_new_rejects_non_http_endpoint() {
        let result = HttpPollClient::new("ws://relay.local/clip", identity(), TransportConfig::default());
        assert!(matches!(result, Err(TransportError::InvalidEndpoint { .. })));

        let result = HttpPollClient::new("not a url", identity(), TransportConfig::default());
        assert!(matches!(result, Err(TransportError::InvalidEndpoint { .. })));

        assert!(HttpPollClient::new("https://relay.local/clip", identity(), TransportConfig::default()).is_ok());
    }

    #[test]
    fn test_tracks_advertised_session() {
        let stats = TransportStats::default();
        let mut download = Download::default();

        let set = download.track(&meta("a", 2, &[0]), &stats).unwrap();
        assert_eq!(set.cid(), "a");
        assert_eq!(set.total(), 2);
        set.insert(0, Bytes::from_static(b"x")).unwrap();

        // same session keeps what was received
        let set = download.track(&meta("a", 2, &[0, 1]), &stats).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_inactive_relay_resets_state() {
        let stats = TransportStats::default();
        let mut download = Download::default();
        download.track(&meta("a", 2, &[]), &stats);

        assert!(download.track(&meta("", 0, &[]), &stats).is_none());
        assert!(download.current.is_none());
    }

    #[test]
    fn test_changed_total_restarts_tracking() {
        let stats = TransportStats::default();
        let mut download = Download::default();
        let set = download.track(&meta("a", 3, &[0]), &stats).unwrap();
        set.insert(0, Bytes::from_static(b"x")).unwrap();

        let set = download.track(&meta("a", 2, &[0]), &stats).unwrap();
        assert_eq!(set.total(), 2);
        assert!(set.is_empty());
        assert_eq!(stats.snapshot().sessions_superseded, 0);
    }

    #[test]
    fn test_newer_session_supersedes_partial_one() {
        let stats = TransportStats::default();
        let mut download = Download::default();
        let set = download.track(&meta("old", 3, &[0]), &stats).unwrap();
        set.insert(0, Bytes::from_static(b"x")).unwrap();

        let set = download.track(&meta("new", 1, &[0]), &stats).unwrap();
        assert_eq!(set.cid(), "new");
        assert_eq!(stats.snapshot().sessions_superseded, 1);
    }

    #[test]
    fn test_completed_session_is_not_tracked_again() {
        let stats = TransportStats::default();
        let mut download = Download::default();
        let set = download.track(&meta("a", 1, &[0]), &stats).unwrap();
        set.insert(0, Bytes::from_static(b"{}")).unwrap();
        let finished = download.finish().unwrap();
        assert_eq!(finished.cid(), "a");

        assert!(download.track(&meta("a", 1, &[0]), &stats).is_none());
        assert!(download.track(&meta("b", 1, &[]), &stats).is_some());
    }

    #[test]
    fn test_abandon_drops_partial_session() {
        let stats = TransportStats::default();
        let mut download = Download::default();
        download.track(&meta("a", 2, &[0]), &stats);
        download.abandon();
        assert!(download.finish().is_none());
        assert!(download.completed.is_none());
    }
}
