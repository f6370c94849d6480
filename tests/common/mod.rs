//! In-process relay used by the integration tests
//!
//! Speaks the chunked HTTP protocol: POSTs store parts per session, a bare
//! GET discovers the newest session and a GET with chunk headers fetches
//! one part.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;

use cliprelay::auth::Identity;
use cliprelay::transport::protocol::{
    DiscoverResponse, HEADER_AUTH_TOKEN, HEADER_CHUNK_ID, HEADER_CHUNK_IDX, HEADER_CHUNK_TOTAL,
    HEADER_DEVICE_ID,
};
use cliprelay::transport::{BackoffConfig, RetryPolicy, TransportConfig};

pub const SHARED_KEY: &str = "00112233aabbccdd";

/// Headers of one received POST
#[derive(Debug, Clone)]
pub struct RecordedPost {
    pub cid: String,
    pub index: usize,
    pub total: usize,
    pub len: usize,
    pub token: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Debug, Default)]
struct Session {
    total: usize,
    parts: BTreeMap<usize, Bytes>,
}

#[derive(Debug, Default)]
pub struct RelayState {
    sessions: HashMap<String, Session>,
    latest: Option<String>,
    gone: HashSet<String>,
    posts: Vec<RecordedPost>,
    failing_posts: usize,
}

type Shared = Arc<Mutex<RelayState>>;

pub struct FakeRelay {
    pub addr: SocketAddr,
    state: Shared,
}

impl FakeRelay {
    pub async fn start() -> Self {
        let state: Shared = Arc::default();
        let app = Router::new()
            .route("/clip", get(download).post(upload))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/clip", self.addr)
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.state.lock().unwrap().posts.clone()
    }

    /// Answer the next `count` POSTs with 500
    pub fn fail_next_posts(&self, count: usize) {
        self.state.lock().unwrap().failing_posts = count;
    }

    /// Store a complete session as if a client had uploaded it
    pub fn publish(&self, cid: &str, parts: Vec<Bytes>) {
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(
            cid.to_string(),
            Session {
                total: parts.len(),
                parts: parts.into_iter().enumerate().collect(),
            },
        );
        state.latest = Some(cid.to_string());
    }

    /// Flush a session: fetches answer 410 while discover keeps advertising it
    pub fn flush(&self, cid: &str) {
        self.state.lock().unwrap().gone.insert(cid.to_string());
    }

    /// Merged payload of a stored session
    pub fn payload(&self, cid: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let session = state.sessions.get(cid)?;
        Some(session.parts.values().flat_map(|part| part.to_vec()).collect())
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn header_usize(headers: &HeaderMap, name: &str) -> Option<usize> {
    header(headers, name).and_then(|value| value.parse().ok())
}

async fn upload(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let mut state = state.lock().unwrap();

    let (Some(cid), Some(index), Some(total)) = (
        header(&headers, HEADER_CHUNK_ID),
        header_usize(&headers, HEADER_CHUNK_IDX),
        header_usize(&headers, HEADER_CHUNK_TOTAL),
    ) else {
        return StatusCode::BAD_REQUEST;
    };

    state.posts.push(RecordedPost {
        cid: cid.clone(),
        index,
        total,
        len: body.len(),
        token: header(&headers, HEADER_AUTH_TOKEN),
        device_id: header(&headers, HEADER_DEVICE_ID),
    });

    if state.failing_posts > 0 {
        state.failing_posts -= 1;
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    if header(&headers, HEADER_AUTH_TOKEN).is_none() {
        return StatusCode::UNAUTHORIZED;
    }
    if total == 0 || index >= total {
        return StatusCode::BAD_REQUEST;
    }

    let session = state.sessions.entry(cid.clone()).or_insert_with(|| Session {
        total,
        parts: BTreeMap::new(),
    });
    if session.total != total {
        return StatusCode::BAD_REQUEST;
    }
    session.parts.insert(index, body);
    state.latest = Some(cid);

    StatusCode::OK
}

async fn download(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let state = state.lock().unwrap();

    let (Some(cid), Some(index)) = (
        header(&headers, HEADER_CHUNK_ID),
        header_usize(&headers, HEADER_CHUNK_IDX),
    ) else {
        let discover = state
            .latest
            .as_ref()
            .and_then(|cid| state.sessions.get(cid).map(|session| (cid, session)))
            .map(|(cid, session)| DiscoverResponse {
                cid: cid.clone(),
                total: session.total,
                have: session.parts.keys().copied().collect(),
            })
            .unwrap_or_default();
        return Json(discover).into_response();
    };

    if state.gone.contains(&cid) {
        return StatusCode::GONE.into_response();
    }

    match state.sessions.get(&cid).and_then(|session| session.parts.get(&index)) {
        Some(part) => part.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn identity(device_id: &str) -> Arc<Identity> {
    Arc::new(Identity::new(device_id, SHARED_KEY).unwrap())
}

/// Transport tunables shrunk so tests finish quickly
pub fn fast_config() -> TransportConfig {
    TransportConfig {
        poll_idle: Duration::from_millis(20),
        request_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_attempts: 5,
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 1.5,
                jitter_factor: 0.2,
            },
        },
        ..TransportConfig::default()
    }
}
