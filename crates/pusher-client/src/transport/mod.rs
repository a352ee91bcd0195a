//! Transport adapters for Pusher.
//!
//! - `ws://` / `wss://` → [`websocket`]
//! - in-process → [`memory`]

pub mod memory;
pub mod websocket;

pub use memory::MemoryPeer;

use pusher_core::error::{PusherError, PusherResult};
use pusher_core::transport::Transport;

/// Open a transport for a connection URL, validating the scheme first.
pub async fn connect(url: &str) -> PusherResult<Transport> {
    check_scheme(url)?;
    websocket::connect(url).await
}

/// Only WebSocket URLs are accepted.
pub fn check_scheme(url: &str) -> PusherResult<()> {
    let lower = url.to_lowercase();
    if lower.starts_with("ws://") || lower.starts_with("wss://") {
        Ok(())
    } else {
        Err(PusherError::Transport(format!(
            "unsupported URL scheme: {url} (expected ws:// or wss://)"
        )))
    }
}
