//! In-process transport backed by unbounded channels.
//!
//! [`pair`] returns a client-side [`Transport`] and the [`MemoryPeer`] that
//! plays the server: it scripts inbound frames and observes what the client
//! writes. Used to drive sessions without a network.

use tokio::sync::mpsc;

use pusher_core::codec::{decode_event, encode_event};
use pusher_core::error::{PusherError, PusherResult};
use pusher_core::messages::Event;
use pusher_core::transport::{FrameSink, FrameSource, Transport, TransportFuture};

enum Inbound {
    Text(String),
    Fail(PusherError),
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

/// The server side of an in-memory connection.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Inbound>>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Create a connected client transport and its peer.
pub fn pair() -> (Transport, MemoryPeer) {
    let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

    let transport = Transport::new(
        Box::new(MemorySink {
            tx: Some(to_peer_tx),
        }),
        Box::new(MemorySource { rx: to_client_rx }),
    );
    let peer = MemoryPeer {
        tx: Some(to_client_tx),
        rx: to_peer_rx,
    };
    (transport, peer)
}

impl FrameSink for MemorySink {
    fn send_text(&mut self, text: String) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let tx = self
                .tx
                .as_ref()
                .ok_or_else(|| PusherError::Transport("connection closed".into()))?;
            tx.send(text)
                .map_err(|_| PusherError::Transport("peer went away".into()))
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.tx = None;
            Ok(())
        })
    }
}

impl FrameSource for MemorySource {
    fn recv_text(&mut self) -> TransportFuture<'_, Option<String>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(Inbound::Text(text)) => Ok(Some(text)),
                Some(Inbound::Fail(e)) => Err(e),
                None => Ok(None),
            }
        })
    }
}

impl MemoryPeer {
    /// Deliver a raw text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) -> PusherResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| PusherError::Transport("peer closed".into()))?;
        tx.send(Inbound::Text(text.into()))
            .map_err(|_| PusherError::Transport("client went away".into()))
    }

    /// Deliver an envelope to the client.
    pub fn send_event(&self, event: &Event) -> PusherResult<()> {
        self.send_text(encode_event(event)?)
    }

    /// Make the client's next read fail with `error`.
    pub fn fail(&self, error: PusherError) -> PusherResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| PusherError::Transport("peer closed".into()))?;
        tx.send(Inbound::Fail(error))
            .map_err(|_| PusherError::Transport("client went away".into()))
    }

    /// Close the server side; the client reads end-of-stream.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Next frame written by the client. `None` once the client has closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Next envelope written by the client.
    pub async fn recv_event(&mut self) -> Option<Event> {
        let text = self.rx.recv().await?;
        decode_event(&text).ok()
    }

    /// A frame the client already wrote, without waiting.
    pub fn try_recv_event(&mut self) -> Option<Event> {
        let text = self.rx.try_recv().ok()?;
        decode_event(&text).ok()
    }
}
