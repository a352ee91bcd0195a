//! Subscription authorization for private and presence channels.
//!
//! The server only accepts a `pusher:subscribe` for a `private-` or
//! `presence-` channel when it carries a signature produced by the app's
//! auth endpoint over `socket_id:channel_name[:channel_data]`. The client
//! never signs anything itself; it asks an [`Authorizer`].

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use pusher_core::{PusherError, PusherResult};

use crate::config::AuthConfig;

/// What the authorizer is asked to sign.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    pub channel_name: &'a str,
    pub socket_id: &'a str,
    /// Caller-supplied presence `channel_data` (JSON text), if any.
    pub channel_data: Option<&'a str>,
    /// Extra form parameters for this request only.
    pub params: &'a [(String, String)],
}

/// A successful authorization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthResponse {
    /// `"<app_key>:<signature>"`.
    pub auth: String,
    /// Presence `channel_data` (JSON text) as signed by the server.
    #[serde(default)]
    pub channel_data: Option<String>,
}

pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = PusherResult<AuthResponse>> + Send + 'a>>;

/// Signs subscription requests for authenticated channels.
pub trait Authorizer: Send + Sync {
    fn authorize<'a>(&'a self, request: AuthRequest<'a>) -> AuthFuture<'a>;
}

/// Authorizer that POSTs a form to an HTTP endpoint.
///
/// Body: `socket_id`, `channel_name`, optional `channel_data`, then the
/// configured and per-request extra parameters. Expects a 2xx JSON body
/// `{"auth": "...", "channel_data": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpAuthorizer {
    http: reqwest::Client,
    config: AuthConfig,
}

impl HttpAuthorizer {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn form(&self, request: &AuthRequest<'_>) -> Vec<(String, String)> {
        let mut form = vec![
            ("socket_id".to_string(), request.socket_id.to_string()),
            ("channel_name".to_string(), request.channel_name.to_string()),
        ];
        if let Some(data) = request.channel_data {
            form.push(("channel_data".to_string(), data.to_string()));
        }
        form.extend(self.config.params.iter().cloned());
        form.extend(request.params.iter().cloned());
        form
    }

    async fn post(&self, request: AuthRequest<'_>) -> PusherResult<AuthResponse> {
        let mut builder = self.http.post(&self.config.url).form(&self.form(&request));
        for (name, value) in &self.config.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PusherError::Auth(format!("request to {} failed: {e}", self.config.url)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PusherError::Auth(format!(
                "{} returned {status}: {}",
                self.config.url,
                body.trim()
            )));
        }

        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|e| PusherError::Auth(format!("invalid auth response: {e}")))?;

        tracing::debug!(channel = %request.channel_name, "channel authorized");
        Ok(auth)
    }
}

impl Authorizer for HttpAuthorizer {
    fn authorize<'a>(&'a self, request: AuthRequest<'a>) -> AuthFuture<'a> {
        Box::pin(self.post(request))
    }
}
