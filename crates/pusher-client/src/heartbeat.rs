//! Activity-timeout keepalive.
//!
//! The monitor holds an idle timer of `activity_timeout`. Any traffic, in
//! either direction, calls [`ActivitySignal::touch`], which restarts the
//! timer. When the timer expires a single `pusher:ping` is sent; the timer
//! stays expired until the next touch, so an idle connection gets exactly one
//! ping per quiet period.
//!
//! No pong deadline is armed after the ping.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{self, Instant};

use pusher_core::codec::encode_event;
use pusher_core::messages::Event;
use pusher_core::transport::FrameSink;

/// Write half shared by the session, its channels, and the heartbeat.
pub(crate) type SharedSink = Arc<Mutex<Box<dyn FrameSink>>>;

/// Single-slot "reset requested" signal.
#[derive(Debug, Clone)]
pub(crate) struct ActivitySignal {
    tx: mpsc::Sender<()>,
}

impl ActivitySignal {
    /// Request a timer restart. Never blocks: if a restart is already
    /// pending this one is dropped.
    pub(crate) fn touch(&self) {
        let _ = self.tx.try_send(());
    }
}

/// The keepalive loop, built at handshake and consumed by [`Heartbeat::run`].
pub(crate) struct Heartbeat {
    timeout: Duration,
    resets: mpsc::Receiver<()>,
    sink: SharedSink,
    shutdown: watch::Receiver<bool>,
}

impl Heartbeat {
    pub(crate) fn new(
        timeout: Duration,
        sink: SharedSink,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, ActivitySignal) {
        let (tx, resets) = mpsc::channel(1);
        (
            Self {
                timeout,
                resets,
                sink,
                shutdown,
            },
            ActivitySignal { tx },
        )
    }

    pub(crate) async fn run(mut self) {
        let idle = time::sleep(self.timeout);
        tokio::pin!(idle);
        let mut armed = true;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                reset = self.resets.recv() => {
                    if reset.is_none() {
                        break;
                    }
                    idle.as_mut().reset(Instant::now() + self.timeout);
                    armed = true;
                }

                () = &mut idle, if armed => {
                    armed = false;
                    self.send_ping().await;
                }
            }
        }

        tracing::debug!("heartbeat loop ended");
    }

    async fn send_ping(&self) {
        let frame = match encode_event(&Event::ping()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("failed to encode ping: {}", e);
                return;
            }
        };

        tracing::trace!("idle for {:?}, sending ping", self.timeout);
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send_text(frame).await {
            tracing::debug!("ping not sent: {}", e);
        }
    }
}
