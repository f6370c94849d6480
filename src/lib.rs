//! # ClipRelay
//!
//! Clipboard synchronization between machines through an untrusted relay.
//!
//! The crate is organised around the [`transport::Client`] contract: the
//! [`sync`] loops push local clipboard captures into `send` and apply whatever
//! `poll` yields. Two transports implement the contract, chunked HTTP polling
//! ([`transport::poll`]) and a persistent WebSocket ([`transport::websocket`]).

pub mod auth;
pub mod cli;
pub mod clipboard;
pub mod config;
pub mod sync;
pub mod transport;

pub use clipboard::{quick_key, Item, Snapshot};
pub use config::Config;

/// Result type alias for ClipRelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ClipRelay operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(#[from] auth::AuthError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest serialized snapshot accepted for upload (32 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;
