//! Abstract frame transport for the Pusher protocol.
//!
//! A connection is split into a write half ([`FrameSink`]) and a read half
//! ([`FrameSource`]) so the session can read and write from different tasks.
//! Both halves move whole text frames; JSON encoding lives in [`crate::codec`].

use crate::error::PusherResult;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the transport traits.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = PusherResult<T>> + Send + 'a>>;

/// Write half of a connection.
pub trait FrameSink: Send {
    /// Send one text frame.
    fn send_text(&mut self, text: String) -> TransportFuture<'_, ()>;

    /// Close the connection. Closing an already-closed connection succeeds.
    fn close(&mut self) -> TransportFuture<'_, ()>;
}

/// Read half of a connection.
pub trait FrameSource: Send {
    /// Receive the next text frame. `Ok(None)` means the peer closed the
    /// connection cleanly.
    fn recv_text(&mut self) -> TransportFuture<'_, Option<String>>;
}

/// An opened connection, ready for the handshake.
pub struct Transport {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Transport {
    pub fn new(sink: Box<dyn FrameSink>, source: Box<dyn FrameSource>) -> Self {
        Self { sink, source }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
