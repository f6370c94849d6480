//! Wire contract with the relay server
//!
//! The relay stores the chunks of one snapshot transfer under a session id
//! (`cid`). Uploads are `POST`s carrying one chunk each; receivers `GET` the
//! endpoint without chunk headers to discover the active session and with
//! `X-Chunk-Id`/`X-Chunk-Idx` to fetch one chunk.

use serde::{Deserialize, Serialize};

use crate::clipboard::null_as_default;

/// Base64 auth token, see [`crate::auth`]
pub const HEADER_AUTH_TOKEN: &str = "X-Auth-Token";

/// Short id of the requesting client
pub const HEADER_DEVICE_ID: &str = "X-Device-Id";

/// Transfer session id
pub const HEADER_CHUNK_ID: &str = "X-Chunk-Id";

/// 0-based chunk index
pub const HEADER_CHUNK_IDX: &str = "X-Chunk-Idx";

/// Total chunk count; identical on every chunk of a session
pub const HEADER_CHUNK_TOTAL: &str = "X-Chunk-Total";

/// Random bytes in a session id
pub const SESSION_ID_BYTES: usize = 8;

/// Answer to a discover request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverResponse {
    /// Active session, empty when the relay holds none
    #[serde(default)]
    pub cid: String,

    /// Declared chunk count of the active session
    #[serde(default)]
    pub total: usize,

    /// Chunk indices the relay currently stores
    #[serde(default, deserialize_with = "null_as_default")]
    pub have: Vec<usize>,
}

impl DiscoverResponse {
    /// Whether the relay reported an active session
    pub fn is_active(&self) -> bool {
        !self.cid.is_empty() && self.total > 0
    }
}

/// Fresh random session id (16 hex characters)
pub fn new_session_id() -> String {
    let bytes: [u8; SESSION_ID_BYTES] = rand::random();
    hex::encode(bytes)
}
