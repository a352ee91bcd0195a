//! The Pusher client.
//!
//! `Client` owns one connection: it performs the `pusher:connection_established`
//! handshake, runs the read loop and the activity heartbeat, routes inbound
//! events to bindings and channels, and tears everything down on disconnect.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time;

use pusher_core::codec::{decode_event, encode_event, extract_event_error, unmarshal_data_string};
use pusher_core::error::{PusherError, PusherResult};
use pusher_core::messages::*;
use pusher_core::transport::{FrameSource, Transport};

use crate::auth::Authorizer;
use crate::channel::{Channel, ChannelRegistry, PresenceChannel, SubscribeOptions};
use crate::config::ClientConfig;
use crate::heartbeat::{ActivitySignal, Heartbeat, SharedSink};
use crate::router::{EventRouter, Listener, ListenerId};
use crate::transport;

/// Used when the server advertises an activity timeout of zero.
const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Slack added to the activity timeout before a silent connection is
/// considered dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves once the connection is gone: `None` after a requested
/// disconnect, `Some(PusherError::Closed(..))` when it failed.
pub type CloseNotification = oneshot::Receiver<Option<PusherError>>;

/// Outbound half of the connection, shared with every channel.
pub(crate) struct Link {
    sink: SharedSink,
    activity: ActivitySignal,
    pub(crate) socket_id: String,
    pub(crate) authorizer: Option<Arc<dyn Authorizer>>,
}

impl Link {
    /// Encode and write one envelope. Resets the heartbeat.
    pub(crate) async fn send_event(&self, event: &Event) -> PusherResult<()> {
        let frame = encode_event(event)?;
        self.activity.touch();
        let mut sink = self.sink.lock().await;
        sink.send_text(frame).await
    }

    async fn close(&self) -> PusherResult<()> {
        let mut sink = self.sink.lock().await;
        sink.close().await
    }

    #[cfg(test)]
    pub(crate) fn for_test(
        socket_id: &str,
        authorizer: Option<Arc<dyn Authorizer>>,
    ) -> (Arc<Self>, crate::transport::MemoryPeer) {
        let (transport, peer) = crate::transport::memory::pair();
        let sink: SharedSink = Arc::new(Mutex::new(transport.sink));
        let (_heartbeat, activity) =
            Heartbeat::new(DEFAULT_ACTIVITY_TIMEOUT, sink.clone(), watch::channel(false).1);
        let link = Arc::new(Self {
            sink,
            activity,
            socket_id: socket_id.to_string(),
            authorizer,
        });
        (link, peer)
    }
}

/// Session state guarded by one lock.
struct SessionState {
    connected: bool,
    router: EventRouter<Event>,
    channels: ChannelRegistry,
    /// Why the connection failed, if it did.
    disconnect_err: Option<PusherError>,
}

struct Inner {
    state: RwLock<SessionState>,
    closes: Mutex<Vec<oneshot::Sender<Option<PusherError>>>>,
    link: Arc<Link>,
    activity_timeout: Duration,
    listener_capacity: usize,
    errors: Option<tokio::sync::mpsc::Sender<PusherError>>,
    shutdown: watch::Sender<bool>,
}

/// A connected Pusher client.
pub struct Client {
    inner: Arc<Inner>,
    read_handle: Option<JoinHandle<()>>,
    heartbeat_handle: Option<JoinHandle<()>>,
}

impl Client {
    /// Dial the Pusher endpoint for `app_key` and complete the handshake.
    pub async fn connect(app_key: &str, config: ClientConfig) -> PusherResult<Self> {
        let url = config.connection_url(app_key);
        tracing::info!("connecting to {}", url);

        let transport = transport::connect(&url).await?;
        Self::connect_with(transport, config).await
    }

    /// Complete the handshake over an already open transport.
    pub async fn connect_with(transport: Transport, config: ClientConfig) -> PusherResult<Self> {
        let Transport { mut sink, mut source } = transport;

        let handshake = time::timeout(config.handshake_timeout, Self::handshake(&mut *source)).await;
        let established = match handshake {
            Ok(Ok(established)) => established,
            Ok(Err(e)) => {
                let _ = sink.close().await;
                return Err(e);
            }
            Err(_) => {
                let _ = sink.close().await;
                return Err(PusherError::Timeout);
            }
        };

        let activity_timeout = config
            .activity_timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(Duration::from_secs(established.activity_timeout));
        let activity_timeout = if activity_timeout.is_zero() {
            DEFAULT_ACTIVITY_TIMEOUT
        } else {
            activity_timeout
        };

        tracing::info!(
            socket_id = %established.socket_id,
            "connected, activity timeout {:?}",
            activity_timeout
        );

        let sink: SharedSink = Arc::new(Mutex::new(sink));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (heartbeat, activity) = Heartbeat::new(activity_timeout, sink.clone(), shutdown_rx.clone());

        let inner = Arc::new(Inner {
            state: RwLock::new(SessionState {
                connected: true,
                router: EventRouter::new(config.listener_capacity),
                channels: ChannelRegistry::default(),
                disconnect_err: None,
            }),
            closes: Mutex::new(Vec::new()),
            link: Arc::new(Link {
                sink,
                activity,
                socket_id: established.socket_id,
                authorizer: config.resolve_authorizer(),
            }),
            activity_timeout,
            listener_capacity: config.listener_capacity,
            errors: config.errors.clone(),
            shutdown,
        });

        let heartbeat_handle = tokio::spawn(heartbeat.run());
        let read_handle = tokio::spawn(Self::read_loop(inner.clone(), source, shutdown_rx));

        Ok(Self {
            inner,
            read_handle: Some(read_handle),
            heartbeat_handle: Some(heartbeat_handle),
        })
    }

    /// Socket id assigned by the server.
    pub fn socket_id(&self) -> &str {
        &self.inner.link.socket_id
    }

    /// Effective activity timeout (override or server value).
    pub fn activity_timeout(&self) -> Duration {
        self.inner.activity_timeout
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.read().await.connected
    }

    /// Bind to a non-reserved event name, on any channel or none.
    pub async fn bind(&self, event: &str) -> Listener<Event> {
        self.inner.state.write().await.router.bind(event)
    }

    /// Remove bindings for `event`; every one of them when `ids` is empty.
    pub async fn unbind(&self, event: &str, ids: &[ListenerId]) {
        self.inner.state.write().await.router.unbind(event, ids)
    }

    /// Send an event, optionally scoped to a channel.
    pub async fn send_event<T: Serialize>(
        &self,
        event: &str,
        data: &T,
        channel: Option<&str>,
    ) -> PusherResult<()> {
        if !self.is_connected().await {
            return Err(PusherError::NotConnected);
        }

        let data = serde_json::to_value(data)?;
        let envelope = match channel {
            Some(channel) => Event::on_channel(event, channel, data),
            None => Event::new(event, data),
        };
        self.inner.link.send_event(&envelope).await
    }

    /// Subscribe to a channel, returning its registry entry.
    ///
    /// A second call for the same name returns the existing entry without
    /// sending anything, along with the failure of its last attempt if that
    /// attempt sent nothing. The entry is returned even when the request
    /// fails, so the caller can retry with [`Channel::subscribe`].
    pub async fn subscribe(&self, name: &str, opts: SubscribeOptions) -> (Channel, PusherResult<()>) {
        let (channel, created, connected) = {
            let mut state = self.inner.state.write().await;
            let link = self.inner.link.clone();
            let capacity = self.inner.listener_capacity;
            let (channel, created) = state
                .channels
                .get_or_insert(name, || Channel::new(name, link, capacity));
            (channel, created, state.connected)
        };

        if !connected {
            return (channel, Err(PusherError::NotConnected));
        }
        if !created {
            let result = match channel.last_failure().await {
                Some(e) => Err(e),
                None => Ok(()),
            };
            return (channel, result);
        }

        let result = channel.subscribe(opts).await;
        (channel, result)
    }

    /// Subscribe to a `presence-` channel.
    ///
    /// Fails up front with [`PusherError::InvalidChannel`] when the name lacks
    /// the prefix; nothing is registered in that case.
    pub async fn subscribe_presence(
        &self,
        name: &str,
        opts: SubscribeOptions,
    ) -> PusherResult<(PresenceChannel, PusherResult<()>)> {
        if !name.starts_with("presence-") {
            return Err(PusherError::InvalidChannel(format!(
                "invalid presence channel name, must start with 'presence-': {name}"
            )));
        }

        let (channel, result) = self.subscribe(name, opts).await;
        Ok((PresenceChannel::new(channel)?, result))
    }

    /// Leave a channel. Unknown names are a no-op.
    pub async fn unsubscribe(&self, name: &str) -> PusherResult<()> {
        let channel = self.inner.state.write().await.channels.remove(name);
        let Some(channel) = channel else {
            return Ok(());
        };

        channel.mark_unsubscribed().await;
        tracing::info!(channel = %name, "unsubscribing");

        let data = serde_json::to_value(UnsubscribeData {
            channel: name.to_string(),
        })?;
        self.inner
            .link
            .send_event(&Event::new(PUSHER_UNSUBSCRIBE, data))
            .await
    }

    /// The registry entry for `name`, if subscribed.
    pub async fn channel(&self, name: &str) -> Option<Channel> {
        self.inner.state.read().await.channels.get(name)
    }

    /// Names of all registry entries, sorted.
    pub async fn channels(&self) -> Vec<String> {
        self.inner.state.read().await.channels.names()
    }

    /// Register for the close notification. When the connection is already
    /// gone the notification is ready immediately.
    pub async fn notify_close(&self) -> CloseNotification {
        let (tx, rx) = oneshot::channel();

        let mut closes = self.inner.closes.lock().await;
        let state = self.inner.state.read().await;
        if state.connected {
            closes.push(tx);
        } else {
            let _ = tx.send(closed_with(state.disconnect_err.clone()));
        }

        rx
    }

    /// Close the connection and stop both loops.
    pub async fn disconnect(&self) -> PusherResult<()> {
        self.inner.disconnect().await
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Wait for `pusher:connection_established`.
    async fn handshake(source: &mut dyn FrameSource) -> PusherResult<ConnectionData> {
        let text = source
            .recv_text()
            .await?
            .ok_or(PusherError::ConnectionClosed)?;
        let event = decode_event(&text)?;

        match event.event.as_str() {
            PUSHER_CONNECTION_ESTABLISHED => unmarshal_data_string(&event.data),
            PUSHER_ERROR => Err(extract_event_error(&event)),
            other => Err(PusherError::UnexpectedHandshake(other.to_string())),
        }
    }

    /// Read frames until shutdown or failure.
    async fn read_loop(
        inner: Arc<Inner>,
        mut source: Box<dyn FrameSource>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let deadline = inner.activity_timeout + PONG_TIMEOUT;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let frame = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                frame = time::timeout(deadline, source.recv_text()) => frame,
            };

            let received = match frame {
                Ok(result) => result.and_then(|text| text.ok_or(PusherError::ConnectionClosed)),
                Err(_) => Err(PusherError::Timeout),
            };

            let text = match received {
                Ok(text) => text,
                Err(e) => {
                    if !inner.state.read().await.connected {
                        break;
                    }
                    tracing::error!("read error: {}", e);
                    inner.send_error(e.clone());
                    inner.fail(e).await;
                    break;
                }
            };

            inner.link.activity.touch();

            match decode_event(&text) {
                Ok(event) => inner.route(event).await,
                Err(e) => {
                    tracing::warn!("ignoring malformed frame: {}", e);
                    inner.send_error(e);
                }
            }
        }

        tracing::debug!("read loop ended");
    }
}

impl Inner {
    async fn route(&self, event: Event) {
        match event.event.as_str() {
            PUSHER_PING => {
                tracing::trace!("received ping");
                if let Err(e) = self.link.send_event(&Event::pong()).await {
                    tracing::debug!("pong not sent: {}", e);
                }
            }

            PUSHER_PONG => {
                tracing::trace!("received pong");
            }

            PUSHER_ERROR => {
                let err = extract_event_error(&event);
                tracing::warn!("server error: {}", err);
                self.send_error(err);
            }

            name => {
                let channel = {
                    let mut state = self.state.write().await;
                    if !is_reserved(name) {
                        state.router.dispatch(name, &event);
                    }
                    event.channel.as_deref().and_then(|c| state.channels.get(c))
                };

                if let Some(channel) = channel {
                    if let Err(e) = channel.handle_event(&event).await {
                        tracing::warn!(channel = %channel.name(), event = %name, "bad channel event: {}", e);
                        self.send_error(e);
                    }
                } else if is_reserved(name) {
                    tracing::debug!(event = %name, "unhandled reserved event");
                }
            }
        }
    }

    /// Report to the error channel without blocking.
    fn send_error(&self, err: PusherError) {
        if let Some(errors) = &self.errors {
            if errors.try_send(err).is_err() {
                tracing::debug!("error channel full or closed, dropping error");
            }
        }
    }

    /// Record `err` as the disconnect cause and tear down.
    async fn fail(&self, err: PusherError) {
        {
            let mut state = self.state.write().await;
            if !state.connected {
                return;
            }
            state.disconnect_err = Some(err);
        }
        if let Err(e) = self.disconnect().await {
            tracing::debug!("close after failure: {}", e);
        }
    }

    async fn disconnect(&self) -> PusherResult<()> {
        let cause = {
            let mut state = self.state.write().await;
            if state.connected {
                tracing::info!("disconnecting");
            }
            state.connected = false;
            state.disconnect_err.clone()
        };

        let _ = self.shutdown.send(true);

        {
            let mut closes = self.closes.lock().await;
            for tx in closes.drain(..) {
                let _ = tx.send(closed_with(cause.clone()));
            }
        }

        self.link.close().await
    }
}

fn closed_with(cause: Option<PusherError>) -> Option<PusherError> {
    cause.map(|e| PusherError::Closed(Box::new(e)))
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.inner.shutdown.send(true);
        if let Some(h) = self.read_handle.take() {
            h.abort();
        }
        if let Some(h) = self.heartbeat_handle.take() {
            h.abort();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("socket_id", &self.inner.link.socket_id)
            .field("activity_timeout", &self.inner.activity_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthFuture, AuthRequest, AuthResponse};
    use crate::channel::{ChannelKind, SubscriptionState};
    use crate::transport::memory::{self, MemoryPeer};
    use pusher_core::codec::marshal_data_string;
    use serde_json::json;
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::{mpsc, Notify};

    async fn within<F: Future>(f: F) -> F::Output {
        time::timeout(Duration::from_secs(5), f)
            .await
            .expect("timed out")
    }

    fn established(socket_id: &str, activity_timeout: u64) -> Event {
        Event::new(
            PUSHER_CONNECTION_ESTABLISHED,
            marshal_data_string(&json!({
                "socket_id": socket_id,
                "activity_timeout": activity_timeout,
            }))
            .unwrap(),
        )
    }

    async fn connected(config: ClientConfig) -> (Client, MemoryPeer) {
        let (transport, peer) = memory::pair();
        peer.send_event(&established("123.456", 120)).unwrap();
        let client = Client::connect_with(transport, config).await.unwrap();
        (client, peer)
    }

    /// Signs on the second attempt only.
    #[derive(Default)]
    struct SecondTimeLucky {
        tried: AtomicBool,
    }

    impl Authorizer for SecondTimeLucky {
        fn authorize<'a>(&'a self, request: AuthRequest<'a>) -> AuthFuture<'a> {
            let first = !self.tried.swap(true, Ordering::SeqCst);
            Box::pin(async move {
                if first {
                    Err(PusherError::Auth("auth endpoint returned 503".into()))
                } else {
                    Ok(AuthResponse {
                        auth: format!("key:{}", request.socket_id),
                        channel_data: None,
                    })
                }
            })
        }
    }

    struct AlwaysSigns;

    impl Authorizer for AlwaysSigns {
        fn authorize<'a>(&'a self, request: AuthRequest<'a>) -> AuthFuture<'a> {
            Box::pin(async move {
                Ok(AuthResponse {
                    auth: format!("key:{}", request.channel_name),
                    channel_data: request.channel_data.map(str::to_string),
                })
            })
        }
    }

    /// Holds every request until released.
    #[derive(Default)]
    struct GatedSigner {
        started: Notify,
        release: Notify,
    }

    impl Authorizer for GatedSigner {
        fn authorize<'a>(&'a self, request: AuthRequest<'a>) -> AuthFuture<'a> {
            Box::pin(async move {
                self.started.notify_one();
                self.release.notified().await;
                Ok(AuthResponse {
                    auth: format!("key:{}", request.channel_name),
                    channel_data: None,
                })
            })
        }
    }

    // ── Handshake ──

    #[tokio::test]
    async fn handshake_uses_server_timeout() {
        let (client, _peer) = connected(ClientConfig::default()).await;
        assert_eq!(client.socket_id(), "123.456");
        assert_eq!(client.activity_timeout(), Duration::from_secs(120));
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn configured_timeout_overrides_server() {
        let config = ClientConfig {
            activity_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let (client, _peer) = connected(config).await;
        assert_eq!(client.activity_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn handshake_error_envelope_is_returned() {
        let (transport, peer) = memory::pair();
        peer.send_event(&Event::new(
            PUSHER_ERROR,
            json!({"code": 4001, "message": "App key abc not in this cluster"}),
        ))
        .unwrap();

        let err = Client::connect_with(transport, ClientConfig::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PusherError::Protocol {
                code: Some(4001),
                message: "App key abc not in this cluster".into()
            }
        );
    }

    #[tokio::test]
    async fn handshake_rejects_unexpected_event() {
        let (transport, peer) = memory::pair();
        peer.send_event(&Event::new("foo", json!("{}"))).unwrap();

        let err = Client::connect_with(transport, ClientConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err, PusherError::UnexpectedHandshake("foo".into()));
    }

    #[tokio::test]
    async fn handshake_fails_when_peer_closes() {
        let (transport, mut peer) = memory::pair();
        peer.close();

        let err = Client::connect_with(transport, ClientConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err, PusherError::ConnectionClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_times_out() {
        let (transport, _peer) = memory::pair();
        let config = ClientConfig {
            handshake_timeout: Duration::from_secs(2),
            ..Default::default()
        };

        let err = Client::connect_with(transport, config).await.unwrap_err();
        assert_eq!(err, PusherError::Timeout);
    }

    #[tokio::test]
    async fn connect_reports_dial_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ClientConfig {
            insecure: true,
            host: Some("127.0.0.1".into()),
            port: Some(port),
            ..Default::default()
        };
        let err = Client::connect("key", config).await.unwrap_err();
        assert!(matches!(err, PusherError::Transport(_)));
    }

    // ── Bindings ──

    #[tokio::test]
    async fn every_listener_gets_one_copy() {
        let (client, peer) = connected(ClientConfig::default()).await;
        let mut listeners = vec![
            client.bind("foo").await,
            client.bind("foo").await,
            client.bind("foo").await,
        ];

        peer.send_event(&Event::new("foo", json!("{\"n\":1}"))).unwrap();

        for listener in &mut listeners {
            let event = within(listener.recv()).await.unwrap();
            assert_eq!(event.event, "foo");
            assert_eq!(event.data, json!("{\"n\":1}"));
        }

        let mut sync = client.bind("sync").await;
        peer.send_event(&Event::new("sync", json!("{}"))).unwrap();
        within(sync.recv()).await.unwrap();
        for listener in &mut listeners {
            assert!(listener.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn unbind_all_stops_delivery() {
        let (client, peer) = connected(ClientConfig::default()).await;
        let mut foo = client.bind("foo").await;
        let mut sync = client.bind("sync").await;

        client.unbind("foo", &[]).await;
        peer.send_event(&Event::new("foo", json!("{}"))).unwrap();
        peer.send_event(&Event::new("sync", json!("{}"))).unwrap();

        within(sync.recv()).await.unwrap();
        assert!(foo.try_recv().is_err());
    }

    #[tokio::test]
    async fn ping_is_answered_and_not_delivered() {
        let (client, mut peer) = connected(ClientConfig::default()).await;
        let mut pings = client.bind(PUSHER_PING).await;
        let mut sync = client.bind("sync").await;

        peer.send_event(&Event::ping()).unwrap();
        let pong = within(peer.recv_event()).await.unwrap();
        assert_eq!(pong.event, PUSHER_PONG);

        peer.send_event(&Event::new("sync", json!("{}"))).unwrap();
        within(sync.recv()).await.unwrap();
        assert!(pings.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_error_goes_to_error_channel() {
        let (errors_tx, mut errors_rx) = mpsc::channel(8);
        let config = ClientConfig {
            errors: Some(errors_tx),
            ..Default::default()
        };
        let (client, peer) = connected(config).await;

        peer.send_event(&Event::new(
            PUSHER_ERROR,
            json!({"code": 4201, "message": "Pong reply not received"}),
        ))
        .unwrap();

        let err = within(errors_rx.recv()).await.unwrap();
        assert_eq!(
            err,
            PusherError::Protocol {
                code: Some(4201),
                message: "Pong reply not received".into()
            }
        );
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let (errors_tx, mut errors_rx) = mpsc::channel(8);
        let config = ClientConfig {
            errors: Some(errors_tx),
            ..Default::default()
        };
        let (client, peer) = connected(config).await;
        let mut sync = client.bind("sync").await;

        peer.send_text("not json").unwrap();
        peer.send_event(&Event::new("sync", json!("{}"))).unwrap();

        within(sync.recv()).await.unwrap();
        assert!(matches!(errors_rx.try_recv(), Ok(PusherError::Codec(_))));
        assert!(client.is_connected().await);
    }

    // ── Channels ──

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let (client, mut peer) = connected(ClientConfig::default()).await;

        let (first, result) = client.subscribe("news", SubscribeOptions::default()).await;
        result.unwrap();
        assert_eq!(first.kind(), ChannelKind::Public);

        let sent = within(peer.recv_event()).await.unwrap();
        assert_eq!(sent.event, PUSHER_SUBSCRIBE);
        assert_eq!(sent.data, json!({"channel": "news"}));

        let (second, result) = client.subscribe("news", SubscribeOptions::default()).await;
        result.unwrap();
        assert!(first.same_channel(&second));
        assert!(peer.try_recv_event().is_none());
        assert_eq!(client.channels().await, vec!["news"]);
    }

    #[tokio::test]
    async fn channel_variant_follows_prefix() {
        let config = ClientConfig {
            authorizer: Some(Arc::new(AlwaysSigns)),
            ..Default::default()
        };
        let (client, _peer) = connected(config).await;

        let (private, _) = client.subscribe("private-chat", SubscribeOptions::default()).await;
        let (presence, _) = client.subscribe("presence-room", SubscribeOptions::default()).await;
        assert_eq!(private.kind(), ChannelKind::Private);
        assert_eq!(presence.kind(), ChannelKind::Presence);
    }

    #[tokio::test]
    async fn failed_authorization_can_be_retried() {
        let config = ClientConfig {
            authorizer: Some(Arc::new(SecondTimeLucky::default())),
            ..Default::default()
        };
        let (client, mut peer) = connected(config).await;

        let (channel, result) = client.subscribe("private-chat", SubscribeOptions::default()).await;
        assert!(matches!(result, Err(PusherError::Auth(_))));
        assert_eq!(channel.state().await, SubscriptionState::Subscribing);
        assert!(peer.try_recv_event().is_none());

        channel.subscribe(SubscribeOptions::default()).await.unwrap();
        let sent = within(peer.recv_event()).await.unwrap();
        assert_eq!(
            sent.data,
            json!({"channel": "private-chat", "auth": "key:123.456"})
        );
    }

    #[tokio::test]
    async fn repeat_subscribe_reports_failed_authorization() {
        let config = ClientConfig {
            authorizer: Some(Arc::new(SecondTimeLucky::default())),
            ..Default::default()
        };
        let (client, mut peer) = connected(config).await;

        let (channel, first) = client.subscribe("private-chat", SubscribeOptions::default()).await;
        assert!(matches!(first, Err(PusherError::Auth(_))));

        let (again, second) = client.subscribe("private-chat", SubscribeOptions::default()).await;
        assert!(again.same_channel(&channel));
        assert_eq!(second, first);
        assert_eq!(channel.state().await, SubscriptionState::Subscribing);
        assert!(peer.try_recv_event().is_none());

        channel.subscribe(SubscribeOptions::default()).await.unwrap();
        within(peer.recv_event()).await.unwrap();
        let (_, third) = client.subscribe("private-chat", SubscribeOptions::default()).await;
        third.unwrap();
        assert!(peer.try_recv_event().is_none());
    }

    #[tokio::test]
    async fn unsubscribe_during_authorization_sends_no_subscribe() {
        let signer = Arc::new(GatedSigner::default());
        let authorizer: Arc<dyn Authorizer> = signer.clone();
        let config = ClientConfig {
            authorizer: Some(authorizer),
            ..Default::default()
        };
        let (client, mut peer) = connected(config).await;

        let ((channel, result), ()) = within(async {
            tokio::join!(
                client.subscribe("private-x", SubscribeOptions::default()),
                async {
                    signer.started.notified().await;
                    client.unsubscribe("private-x").await.unwrap();
                    signer.release.notify_one();
                }
            )
        })
        .await;

        assert!(matches!(result, Err(PusherError::InvalidChannel(_))));
        let sent = within(peer.recv_event()).await.unwrap();
        assert_eq!(sent.event, PUSHER_UNSUBSCRIBE);
        assert!(peer.try_recv_event().is_none());
        assert!(client.channels().await.is_empty());
        assert_eq!(channel.state().await, SubscriptionState::Unsubscribed);

        let retry = channel.subscribe(SubscribeOptions::default()).await;
        assert!(matches!(retry, Err(PusherError::InvalidChannel(_))));
        assert!(peer.try_recv_event().is_none());
    }

    #[tokio::test]
    async fn presence_requires_prefix() {
        let (client, mut peer) = connected(ClientConfig::default()).await;

        let err = client
            .subscribe_presence("private-room", SubscribeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PusherError::InvalidChannel(_)));
        assert!(client.channel("private-room").await.is_none());
        assert!(peer.try_recv_event().is_none());
    }

    #[tokio::test]
    async fn presence_membership_follows_server() {
        let config = ClientConfig {
            authorizer: Some(Arc::new(AlwaysSigns)),
            ..Default::default()
        };
        let (client, mut peer) = connected(config).await;

        let opts = SubscribeOptions {
            channel_data: Some(json!({"user_id": "B", "user_info": {"name": "bob"}})),
            ..Default::default()
        };
        let (room, result) = client.subscribe_presence("presence-room", opts).await.unwrap();
        result.unwrap();
        within(peer.recv_event()).await.unwrap();
        assert_eq!(room.me().await.unwrap().user_id, "B");

        let mut confirmed = room.bind(PUSHER_SUBSCRIPTION_SUCCEEDED).await;
        let roster = json!({"presence": {
            "ids": ["A", "B"],
            "hash": {"A": {"name": "ann"}, "B": {"name": "bob"}},
            "count": 2
        }});
        peer.send_event(&Event::on_channel(
            PUSHER_INTERNAL_SUBSCRIPTION_SUCCEEDED,
            "presence-room",
            marshal_data_string(&roster).unwrap(),
        ))
        .unwrap();
        within(confirmed.recv()).await.unwrap();
        assert!(room.is_subscribed().await);
        assert_eq!(room.member_count().await, 2);

        let mut sync = client.bind("sync").await;
        peer.send_event(&Event::on_channel(
            PUSHER_INTERNAL_MEMBER_REMOVED,
            "presence-room",
            marshal_data_string(&json!({"user_id": "A"})).unwrap(),
        ))
        .unwrap();
        peer.send_event(&Event::on_channel(
            PUSHER_INTERNAL_MEMBER_ADDED,
            "presence-room",
            marshal_data_string(&json!({"user_id": "C", "user_info": null})).unwrap(),
        ))
        .unwrap();
        peer.send_event(&Event::new("sync", json!("{}"))).unwrap();
        within(sync.recv()).await.unwrap();

        let mut ids: Vec<String> = room.members().await.into_keys().collect();
        ids.sort();
        assert_eq!(ids, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn channel_events_reach_channel_and_generic_bindings() {
        let (client, peer) = connected(ClientConfig::default()).await;
        let (news, _) = client.subscribe("news", SubscribeOptions::default()).await;
        let (sports, _) = client.subscribe("sports", SubscribeOptions::default()).await;

        let mut on_news = news.bind("update").await;
        let mut on_sports = sports.bind("update").await;
        let mut anywhere = client.bind("update").await;

        peer.send_event(&Event::on_channel("update", "news", json!("{\"id\":1}"))).unwrap();

        assert_eq!(within(on_news.recv()).await.unwrap(), json!("{\"id\":1}"));
        let generic = within(anywhere.recv()).await.unwrap();
        assert_eq!(generic.channel_name(), "news");
        assert!(on_sports.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_known_and_unknown() {
        let (client, mut peer) = connected(ClientConfig::default()).await;

        client.unsubscribe("nothing").await.unwrap();
        assert!(peer.try_recv_event().is_none());

        let (news, _) = client.subscribe("news", SubscribeOptions::default()).await;
        within(peer.recv_event()).await.unwrap();

        client.unsubscribe("news").await.unwrap();
        let sent = within(peer.recv_event()).await.unwrap();
        assert_eq!(sent.event, PUSHER_UNSUBSCRIBE);
        assert_eq!(sent.data, json!({"channel": "news"}));
        assert!(client.channel("news").await.is_none());
        assert_eq!(news.state().await, SubscriptionState::Unsubscribed);
    }

    #[tokio::test]
    async fn send_event_is_scoped_to_channel() {
        let (client, mut peer) = connected(ClientConfig::default()).await;

        client
            .send_event("client-typing", &json!({"who": "ann"}), Some("private-chat"))
            .await
            .unwrap();
        let sent = within(peer.recv_event()).await.unwrap();
        assert_eq!(sent.event, "client-typing");
        assert_eq!(sent.channel.as_deref(), Some("private-chat"));
        assert_eq!(sent.data, json!({"who": "ann"}));
    }

    // ── Lifecycle ──

    #[tokio::test]
    async fn graceful_disconnect() {
        let (client, mut peer) = connected(ClientConfig::default()).await;
        let closed = client.notify_close().await;

        client.disconnect().await.unwrap();
        assert_eq!(within(closed).await.unwrap(), None);
        assert!(!client.is_connected().await);
        assert_eq!(within(peer.recv_text()).await, None);

        // already gone: fires immediately
        let late = client.notify_close().await;
        assert_eq!(within(late).await.unwrap(), None);

        client.disconnect().await.unwrap();
        assert_eq!(
            client.send_event("x", &json!({}), None).await,
            Err(PusherError::NotConnected)
        );
    }

    #[tokio::test]
    async fn read_error_disconnects_with_cause() {
        let (errors_tx, mut errors_rx) = mpsc::channel(8);
        let config = ClientConfig {
            errors: Some(errors_tx),
            ..Default::default()
        };
        let (client, peer) = connected(config).await;
        let closed = client.notify_close().await;

        peer.fail(PusherError::Transport("connection reset".into())).unwrap();

        let expected = PusherError::Closed(Box::new(PusherError::Transport(
            "connection reset".into(),
        )));
        assert_eq!(within(closed).await.unwrap(), Some(expected.clone()));
        assert_eq!(
            within(errors_rx.recv()).await,
            Some(PusherError::Transport("connection reset".into()))
        );
        assert!(!client.is_connected().await);

        let late = client.notify_close().await;
        assert_eq!(within(late).await.unwrap(), Some(expected));
    }

    #[tokio::test]
    async fn every_close_listener_is_notified() {
        let (client, _peer) = connected(ClientConfig::default()).await;
        let a = client.notify_close().await;
        let b = client.notify_close().await;

        client.disconnect().await.unwrap();
        assert_eq!(within(a).await.unwrap(), None);
        assert_eq!(within(b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn every_close_listener_gets_the_failure() {
        let (client, peer) = connected(ClientConfig::default()).await;
        let a = client.notify_close().await;
        let b = client.notify_close().await;

        peer.fail(PusherError::Transport("x".into())).unwrap();

        let expected = Some(PusherError::Closed(Box::new(PusherError::Transport("x".into()))));
        assert_eq!(within(a).await.unwrap(), expected);
        assert_eq!(within(b).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn peer_close_disconnects() {
        let (client, mut peer) = connected(ClientConfig::default()).await;
        let closed = client.notify_close().await;

        peer.close();
        assert_eq!(
            within(closed).await.unwrap(),
            Some(PusherError::Closed(Box::new(PusherError::ConnectionClosed)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_pings_then_times_out() {
        let config = ClientConfig {
            activity_timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let (client, mut peer) = connected(config).await;
        let closed = client.notify_close().await;
        let started = time::Instant::now();

        let ping = peer.recv_event().await.unwrap();
        assert_eq!(ping.event, PUSHER_PING);

        assert_eq!(
            closed.await.unwrap(),
            Some(PusherError::Closed(Box::new(PusherError::Timeout)))
        );
        assert!(started.elapsed() >= Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_traffic_postpones_ping() {
        let config = ClientConfig {
            activity_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let (client, mut peer) = connected(config).await;
        let started = time::Instant::now();

        time::sleep(Duration::from_secs(3)).await;
        client.send_event("client-x", &json!({}), Some("private-a")).await.unwrap();
        assert_eq!(peer.recv_event().await.unwrap().event, "client-x");

        let ping = peer.recv_event().await.unwrap();
        assert_eq!(ping.event, PUSHER_PING);
        assert!(started.elapsed() >= Duration::from_secs(8));
    }
}
