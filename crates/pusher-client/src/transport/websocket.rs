//! WebSocket transport for Pusher.
//!
//! One Pusher envelope per text frame. WebSocket-level ping/pong frames are
//! answered by tungstenite itself and never surface as envelopes.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use pusher_core::error::{PusherError, PusherResult};
use pusher_core::transport::{FrameSink, FrameSource, Transport, TransportFuture};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a WebSocket connection.
pub struct WebSocketSink {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

/// Read half of a WebSocket connection.
pub struct WebSocketSource {
    stream: SplitStream<WsStream>,
}

/// Dial `url` (`ws://` or `wss://`) and split the connection.
pub async fn connect(url: &str) -> PusherResult<Transport> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|e| PusherError::Transport(format!("WebSocket connect error: {e}")))?;

    tracing::info!("WebSocket connected to {}", url);

    let (sink, stream) = ws_stream.split();
    Ok(Transport::new(
        Box::new(WebSocketSink { sink, closed: false }),
        Box::new(WebSocketSource { stream }),
    ))
}

fn is_closed_error(e: &WsError) -> bool {
    matches!(e, WsError::ConnectionClosed | WsError::AlreadyClosed)
}

impl FrameSink for WebSocketSink {
    fn send_text(&mut self, text: String) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return Err(PusherError::Transport("WebSocket already closed".into()));
            }
            tracing::trace!(frame = %text, "ws send");
            self.sink
                .send(Message::Text(text))
                .await
                .map_err(|e| PusherError::Transport(format!("WS send error: {e}")))
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            match self.sink.send(Message::Close(None)).await {
                Ok(()) => Ok(()),
                Err(e) if is_closed_error(&e) => Ok(()),
                Err(e) => Err(PusherError::Transport(format!("WS close error: {e}"))),
            }
        })
    }
}

impl FrameSource for WebSocketSource {
    fn recv_text(&mut self) -> TransportFuture<'_, Option<String>> {
        Box::pin(async move {
            while let Some(msg) = self.stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        tracing::trace!(frame = %text, "ws recv");
                        return Ok(Some(text));
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => return Ok(Some(text)),
                        Err(_) => {
                            tracing::warn!("ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "WebSocket close frame received");
                        return Ok(None);
                    }
                    Ok(_) => continue, // ping/pong/raw frames
                    Err(e) if is_closed_error(&e) => return Ok(None),
                    Err(e) => return Err(PusherError::Transport(format!("WS read error: {e}"))),
                }
            }
            Ok(None)
        })
    }
}
