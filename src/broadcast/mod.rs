//! WebSocket relay for display clients.
//!
//! Fans every published metrics snapshot out to all connected clients.
//! The stream is best-effort end to end: publication never blocks the
//! engine and a failed or slow client only loses its own snapshots.

pub mod server;

use thiserror::Error;

pub use server::{RelayHandle, RelayServer};

/// Relay-related errors.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Server bind failed: {0}")]
    BindFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),
}
