//! Connection configuration and URL construction.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pusher_core::{PusherError, PROTOCOL_VERSION};

use crate::auth::Authorizer;

const SECURE_SCHEME: &str = "wss";
const SECURE_PORT: u16 = 443;
const INSECURE_SCHEME: &str = "ws";
const INSECURE_PORT: u16 = 80;
const DEFAULT_HOST: &str = "ws.pusherapp.com";

/// Per-listener buffer used when none is configured.
pub const DEFAULT_LISTENER_CAPACITY: usize = 64;

/// Settings for the HTTP authorizer used by private and presence channels.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Endpoint that signs subscription requests.
    pub url: String,
    /// Extra form parameters sent in the POST body.
    pub params: Vec<(String, String)>,
    /// Extra HTTP headers.
    pub headers: Vec<(String, String)>,
}

impl AuthConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Configuration for connecting to Pusher.
#[derive(Clone)]
pub struct ClientConfig {
    /// Cluster to connect to (e.g. `"eu"`). `None` uses the default host.
    pub cluster: Option<String>,
    /// Use `ws://` on port 80 instead of `wss://` on port 443.
    pub insecure: bool,
    /// Explicit host, overriding both the default and the cluster host.
    pub host: Option<String>,
    /// Explicit port, overriding the scheme's port.
    pub port: Option<u16>,
    /// Overrides the activity timeout suggested by the server.
    pub activity_timeout: Option<Duration>,
    /// How long to wait for the connection-established envelope.
    pub handshake_timeout: Duration,
    /// Buffer size of every bound listener.
    pub listener_capacity: usize,
    /// HTTP authorizer settings for private/presence channels.
    pub auth: Option<AuthConfig>,
    /// Custom authorizer. Takes precedence over `auth`.
    pub authorizer: Option<Arc<dyn Authorizer>>,
    /// Receives read errors and server `pusher:error` events. Sends never
    /// block; errors are dropped when the channel is full.
    pub errors: Option<mpsc::Sender<PusherError>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cluster: None,
            insecure: false,
            host: None,
            port: None,
            activity_timeout: None,
            handshake_timeout: Duration::from_secs(10),
            listener_capacity: DEFAULT_LISTENER_CAPACITY,
            auth: None,
            authorizer: None,
            errors: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("cluster", &self.cluster)
            .field("insecure", &self.insecure)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("activity_timeout", &self.activity_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("listener_capacity", &self.listener_capacity)
            .field("auth", &self.auth)
            .field("authorizer", &self.authorizer.is_some())
            .field("errors", &self.errors.is_some())
            .finish()
    }
}

impl ClientConfig {
    /// Build the WebSocket URL for `app_key`:
    /// `scheme://host:port/app/{app_key}?protocol=7`.
    pub fn connection_url(&self, app_key: &str) -> String {
        let (scheme, mut port) = if self.insecure {
            (INSECURE_SCHEME, INSECURE_PORT)
        } else {
            (SECURE_SCHEME, SECURE_PORT)
        };
        if let Some(p) = self.port {
            port = p;
        }

        let host = match (&self.host, &self.cluster) {
            (Some(host), _) => host.clone(),
            (None, Some(cluster)) => format!("ws-{cluster}.pusher.com"),
            (None, None) => DEFAULT_HOST.to_string(),
        };

        format!("{scheme}://{host}:{port}/app/{app_key}?protocol={PROTOCOL_VERSION}")
    }

    /// The authorizer to use for private and presence channels, if any.
    pub(crate) fn resolve_authorizer(&self) -> Option<Arc<dyn Authorizer>> {
        if let Some(authorizer) = &self.authorizer {
            return Some(authorizer.clone());
        }
        self.auth
            .as_ref()
            .map(|auth| Arc::new(crate::auth::HttpAuthorizer::new(auth.clone())) as Arc<dyn Authorizer>)
    }
}
