//! Shared-key request authentication for the relay
//!
//! Every request carries an `X-Auth-Token`: the current Unix time and that
//! time XORed with a pre-shared 64-bit key, JSON-encoded then base64-encoded.
//! The relay XORs back and rejects stale timestamps.
//!
//! This proves possession of the key and freshness only. XOR is reversible:
//! anyone holding one token recovers the key. The format is fixed by the
//! relay; a keyed MAC over the timestamp would be the real fix.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Length of the shared key in hex characters
pub const KEY_HEX_LEN: usize = 16;

/// Length of generated device ids
pub const DEVICE_ID_LEN: usize = 8;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Key is not 16 hex characters
    #[error("Shared key must be 16 hex characters (8 bytes): {0}")]
    InvalidKey(String),

    /// Token could not be decoded
    #[error("Malformed auth token: {0}")]
    MalformedToken(String),
}

/// Pre-shared 64-bit key
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SharedKey(u64);

impl SharedKey {
    /// Parse the 16-character hex form used in configuration
    pub fn from_hex(hex_key: &str) -> Result<Self, AuthError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| AuthError::InvalidKey(format!("got {} bytes", b.len())))?;
        Ok(Self(u64::from_be_bytes(bytes)))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

// Keep the key out of logs.
impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Decoded form of an `X-Auth-Token`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub ts: i64,
    pub ts_enc: i64,
}

impl AuthToken {
    /// Token for timestamp `ts`
    pub fn new(key: &SharedKey, ts: i64) -> Self {
        Self {
            ts,
            ts_enc: ts ^ key.0 as i64,
        }
    }

    /// Base64 header value
    pub fn encode(&self) -> String {
        // Serializing two integers cannot fail.
        let raw = serde_json::to_vec(self).unwrap_or_default();
        BASE64.encode(raw)
    }

    /// Parse a header value
    pub fn decode(header: &str) -> Result<Self, AuthError> {
        let raw = BASE64
            .decode(header)
            .map_err(|e| AuthError::MalformedToken(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| AuthError::MalformedToken(e.to_string()))
    }

    /// Relay-side check: key matches and `ts` is within `max_skew` seconds of `now`
    pub fn verify(&self, key: &SharedKey, now: i64, max_skew: i64) -> bool {
        (self.ts_enc ^ key.0 as i64) == self.ts && (now - self.ts).abs() <= max_skew
    }
}

/// Who this client is: its short id and the shared key.
///
/// Read-only after construction; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Identity {
    device_id: String,
    key: SharedKey,
}

impl Identity {
    /// Build an identity, failing fast on a malformed key
    pub fn new(device_id: impl Into<String>, key_hex: &str) -> Result<Self, AuthError> {
        Ok(Self {
            device_id: device_id.into(),
            key: SharedKey::from_hex(key_hex)?,
        })
    }

    /// Random short id for a client that has none configured
    pub fn generate_device_id() -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(DEVICE_ID_LEN);
        id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn key(&self) -> &SharedKey {
        &self.key
    }

    /// Fresh `X-Auth-Token` value for the current time
    pub fn auth_token(&self) -> String {
        AuthToken::new(&self.key, chrono::Utc::now().timestamp()).encode()
    }
}
