//! Clipboard data model and the capability used to reach the OS clipboard
//!
//! A [`Snapshot`] is one clipboard capture: an ordered list of [`Item`]s (the
//! first is the primary representation) stamped with its origin, a timestamp
//! and a quick key used for duplicate suppression. The OS clipboard itself is
//! only ever touched through a [`ClipboardProvider`] owned by the
//! [`ClipboardActor`].

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod actor;
pub mod formats;
pub mod memory;
pub mod system;

pub use actor::{ClipboardActor, ClipboardHandle};
pub use formats::FormatRegistry;
pub use memory::MemoryClipboard;
pub use system::SystemClipboard;

/// Quick key of a snapshot without items
pub const EMPTY_QUICK_KEY: &str = "empty";

/// Number of digest bytes kept in a quick key
const QUICK_KEY_BYTES: usize = 8;

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Clipboard backend could not be opened or used
    #[error("Clipboard unavailable: {0}")]
    Unavailable(String),

    /// Format not supported by this backend
    #[error("Unsupported clipboard format: {0}")]
    UnsupportedFormat(u32),

    /// Item payload is not valid base64
    #[error("Invalid item payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    /// Image could not be converted to or from PNG
    #[error("Image conversion failed: {0}")]
    Image(String),

    /// The clipboard actor has shut down
    #[error("Clipboard actor is no longer running")]
    ActorGone,
}

/// One clipboard representation (text, bitmap, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Numeric format identifier, defined by the producing platform
    #[serde(rename = "fmt")]
    format: u32,

    /// Base64-encoded payload
    payload: String,

    /// Length of the decoded payload
    byte_len: usize,

    /// Human-readable format name (e.g. "PNG")
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "non_empty"
    )]
    fmt_name: Option<String>,

    /// MIME type (e.g. "image/png")
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "non_empty"
    )]
    mime_type: Option<String>,
}

impl Item {
    /// Create an item from raw bytes
    pub fn from_bytes(format: u32, data: &[u8]) -> Self {
        Self {
            format,
            payload: BASE64.encode(data),
            byte_len: data.len(),
            fmt_name: None,
            mime_type: None,
        }
    }

    /// Create a UTF-8 text item
    pub fn text(format: u32, text: &str) -> Self {
        Self::from_bytes(format, text.as_bytes()).with_mime_type("text/plain")
    }

    /// Attach a human-readable format name
    pub fn with_format_name(mut self, name: impl Into<String>) -> Self {
        self.fmt_name = Some(name.into());
        self
    }

    /// Attach a MIME type
    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn format(&self) -> u32 {
        self.format
    }

    /// Base64 form of the payload, as carried on the wire
    pub fn encoded_payload(&self) -> &str {
        &self.payload
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn format_name(&self) -> Option<&str> {
        self.fmt_name.as_deref()
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Decode the payload back into raw bytes
    pub fn decode_payload(&self) -> Result<Vec<u8>, ClipboardError> {
        Ok(BASE64.decode(&self.payload)?)
    }
}

/// One synchronized clipboard capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Short id of the client that produced the capture
    pub origin: String,

    /// Unix timestamp in seconds
    pub ts: i64,

    /// Ordered representations, primary first
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<Item>,

    /// Dedup fingerprint, see [`quick_key`]
    #[serde(rename = "qkey", default)]
    pub quick_key: String,
}

impl Snapshot {
    /// Capture `items` as produced by `origin` right now
    pub fn new(origin: impl Into<String>, items: Vec<Item>) -> Self {
        let quick_key = quick_key(&items);
        Self {
            origin: origin.into(),
            ts: chrono::Utc::now().timestamp(),
            items,
            quick_key,
        }
    }

    /// Recompute the quick key from the current items
    pub fn stamp_quick_key(&mut self) {
        self.quick_key = quick_key(&self.items);
    }

    /// A snapshot without items is a sentinel, never applied
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The primary representation, if any
    pub fn primary(&self) -> Option<&Item> {
        self.items.first()
    }
}

/// Content fingerprint over the items' encoded payloads.
///
/// Equality-only: the key is a truncated SHA-256, not a security primitive.
pub fn quick_key(items: &[Item]) -> String {
    if items.is_empty() {
        return EMPTY_QUICK_KEY.to_string();
    }

    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.payload.as_bytes());
    }
    hex::encode(&hasher.finalize()[..QUICK_KEY_BYTES])
}

/// Blocking access to one clipboard backend.
///
/// Implementations are owned by a single thread (see [`ClipboardActor`]) and
/// therefore take `&mut self`.
pub trait ClipboardProvider {
    /// Read every representation currently on the clipboard
    fn read(&mut self) -> Result<Vec<Item>, ClipboardError>;

    /// Replace the clipboard contents with `items`
    fn write(&mut self, items: &[Item]) -> Result<(), ClipboardError>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Treat `null` like an absent field; some peers encode empty lists that way
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Older peers send "" for absent names.
fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
