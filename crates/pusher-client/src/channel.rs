//! Channel subscriptions.
//!
//! A [`Channel`] is one entry of the session's channel registry. Its variant
//! is fixed at construction from the name prefix: `private-` channels need a
//! signature from the [`Authorizer`](crate::auth::Authorizer), `presence-`
//! channels need one too and additionally track the member roster.
//!
//! State machine: `Unsubscribed → Subscribing → Subscribed`. The transition
//! to `Subscribed` happens when the server confirms with
//! `pusher_internal:subscription_succeeded`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use pusher_core::codec::unmarshal_data_string;
use pusher_core::error::{PusherError, PusherResult};
use pusher_core::messages::*;

use crate::auth::AuthRequest;
use crate::client::Link;
use crate::router::{EventRouter, Listener, ListenerId};

/// Channel variant, chosen by name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Public,
    /// `private-*`: subscription must be signed.
    Private,
    /// `presence-*`: signed, and tracks members.
    Presence,
}

impl ChannelKind {
    pub fn classify(name: &str) -> Self {
        if name.starts_with("private-") {
            Self::Private
        } else if name.starts_with("presence-") {
            Self::Presence
        } else {
            Self::Public
        }
    }

    pub fn requires_auth(self) -> bool {
        !matches!(self, Self::Public)
    }
}

/// Subscription state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    /// Subscribe sent (or authorization pending/failed); awaiting the server.
    Subscribing,
    Subscribed,
}

/// Per-call subscription options.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Presence `channel_data` to have signed (usually `{"user_id": ..., "user_info": ...}`).
    pub channel_data: Option<Value>,
    /// Extra form parameters for this authorization request.
    pub auth_params: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Roster {
    members: HashMap<String, Value>,
    me: Option<MemberData>,
}

#[derive(Debug)]
struct ChannelState {
    subscription: SubscriptionState,
    /// Set once the entry leaves the registry; the handle can no longer subscribe.
    removed: bool,
    /// Why the last subscribe attempt sent nothing.
    failure: Option<PusherError>,
    bindings: EventRouter<Value>,
    /// `Some` only for presence channels.
    roster: Option<Roster>,
}

struct ChannelInner {
    name: String,
    kind: ChannelKind,
    link: Arc<Link>,
    state: Mutex<ChannelState>,
}

/// Handle to a channel entry. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn new(name: &str, link: Arc<Link>, listener_capacity: usize) -> Self {
        let kind = ChannelKind::classify(name);
        Self {
            inner: Arc::new(ChannelInner {
                name: name.to_string(),
                kind,
                link,
                state: Mutex::new(ChannelState {
                    subscription: SubscriptionState::Unsubscribed,
                    removed: false,
                    failure: None,
                    bindings: EventRouter::new(listener_capacity),
                    roster: (kind == ChannelKind::Presence).then(Roster::default),
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.inner.kind
    }

    pub async fn state(&self) -> SubscriptionState {
        self.inner.state.lock().await.subscription
    }

    pub async fn is_subscribed(&self) -> bool {
        self.state().await == SubscriptionState::Subscribed
    }

    /// Whether two handles refer to the same registry entry.
    pub fn same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Send (or re-send) the subscribe request.
    ///
    /// A no-op when already subscribed. Authenticated channels call the
    /// authorizer first; if that fails the channel stays `Subscribing` and
    /// the call can be retried. Fails with [`PusherError::InvalidChannel`]
    /// once the channel has been unsubscribed, including when that happens
    /// while authorization is pending.
    pub async fn subscribe(&self, opts: SubscribeOptions) -> PusherResult<()> {
        {
            let mut state = self.inner.state.lock().await;
            if state.removed {
                return Err(self.removed_error());
            }
            if state.subscription == SubscriptionState::Subscribed {
                return Ok(());
            }
            state.subscription = SubscriptionState::Subscribing;
            state.failure = None;
        }

        let result = self.send_subscribe(&opts).await;
        if let Err(e) = &result {
            let mut state = self.inner.state.lock().await;
            if !state.removed {
                state.failure = Some(e.clone());
            }
        }
        result
    }

    async fn send_subscribe(&self, opts: &SubscribeOptions) -> PusherResult<()> {
        let (auth, channel_data) = if self.kind().requires_auth() {
            let (auth, channel_data) = self.authorize(opts).await?;
            (Some(auth), channel_data)
        } else {
            (None, None)
        };

        // held through the send so an unsubscribe cannot slip in between
        let mut state = self.inner.state.lock().await;
        if state.removed {
            tracing::debug!(channel = %self.inner.name, "unsubscribed during authorization, not subscribing");
            return Err(self.removed_error());
        }
        if let (Some(data), Some(roster)) = (&channel_data, state.roster.as_mut()) {
            roster.me = serde_json::from_str::<MemberData>(data).ok();
        }

        let payload = serde_json::to_value(SubscribeData {
            channel: self.inner.name.clone(),
            auth,
            channel_data,
        })?;

        tracing::info!(channel = %self.inner.name, kind = ?self.inner.kind, "subscribing");
        self.inner
            .link
            .send_event(&Event::new(PUSHER_SUBSCRIBE, payload))
            .await
    }

    fn removed_error(&self) -> PusherError {
        PusherError::InvalidChannel(format!("{} has been unsubscribed", self.inner.name))
    }

    /// Failure of the last subscribe attempt, if it sent nothing.
    pub(crate) async fn last_failure(&self) -> Option<PusherError> {
        self.inner.state.lock().await.failure.clone()
    }

    async fn authorize(&self, opts: &SubscribeOptions) -> PusherResult<(String, Option<String>)> {
        let authorizer = self.inner.link.authorizer.as_ref().ok_or_else(|| {
            PusherError::Auth(format!("no authorizer configured for {}", self.inner.name))
        })?;

        let caller_data = opts
            .channel_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let response = authorizer
            .authorize(AuthRequest {
                channel_name: &self.inner.name,
                socket_id: &self.inner.link.socket_id,
                channel_data: caller_data.as_deref(),
                params: &opts.auth_params,
            })
            .await
            .map_err(|e| {
                tracing::warn!(channel = %self.inner.name, "authorization failed: {}", e);
                e
            })?;

        Ok((response.auth, response.channel_data.or(caller_data)))
    }

    /// Bind to an event on this channel. Listeners receive the event's `data`.
    pub async fn bind(&self, event: &str) -> Listener<Value> {
        self.inner.state.lock().await.bindings.bind(event)
    }

    /// Remove bindings; all of them for `event` when `ids` is empty.
    pub async fn unbind(&self, event: &str, ids: &[ListenerId]) {
        self.inner.state.lock().await.bindings.unbind(event, ids)
    }

    /// Trigger a client event on this channel.
    pub async fn trigger<T: Serialize>(&self, event: &str, data: &T) -> PusherResult<()> {
        let data = serde_json::to_value(data)?;
        self.inner
            .link
            .send_event(&Event::on_channel(event, self.inner.name.clone(), data))
            .await
    }

    /// Called when the entry leaves the registry.
    pub(crate) async fn mark_unsubscribed(&self) {
        let mut state = self.inner.state.lock().await;
        state.subscription = SubscriptionState::Unsubscribed;
        state.removed = true;
        state.failure = None;
        if let Some(roster) = state.roster.as_mut() {
            roster.members.clear();
        }
    }

    /// Apply an inbound envelope addressed to this channel.
    pub(crate) async fn handle_event(&self, event: &Event) -> PusherResult<()> {
        let mut state = self.inner.state.lock().await;

        match event.event.as_str() {
            PUSHER_INTERNAL_SUBSCRIPTION_SUCCEEDED | PUSHER_SUBSCRIPTION_SUCCEEDED => {
                state.subscription = SubscriptionState::Subscribed;
                if let Some(roster) = state.roster.as_mut() {
                    let data: PresenceData = unmarshal_data_string(&event.data)?;
                    roster.members = initial_members(data.presence);
                    tracing::debug!(channel = %self.inner.name, members = roster.members.len(), "presence roster loaded");
                }
                tracing::info!(channel = %self.inner.name, "subscribed");
                state
                    .bindings
                    .dispatch(PUSHER_SUBSCRIPTION_SUCCEEDED, &event.data);
            }

            PUSHER_INTERNAL_MEMBER_ADDED | PUSHER_INTERNAL_MEMBER_REMOVED => {
                let subscribed = state.subscription == SubscriptionState::Subscribed;
                let Some(roster) = state.roster.as_mut().filter(|_| subscribed) else {
                    tracing::debug!(channel = %self.inner.name, event = %event.event, "ignoring member event");
                    return Ok(());
                };

                let member: MemberData = unmarshal_data_string(&event.data)?;
                if event.event == PUSHER_INTERNAL_MEMBER_ADDED {
                    tracing::debug!(channel = %self.inner.name, user_id = %member.user_id, "member added");
                    roster.members.insert(member.user_id, member.user_info);
                } else {
                    tracing::debug!(channel = %self.inner.name, user_id = %member.user_id, "member removed");
                    roster.members.remove(&member.user_id);
                }
            }

            name => {
                state.bindings.dispatch(name, &event.data);
            }
        }

        Ok(())
    }

    async fn with_roster<R>(&self, f: impl FnOnce(&Roster) -> R) -> Option<R> {
        let state = self.inner.state.lock().await;
        state.roster.as_ref().map(f)
    }
}

fn initial_members(info: PresenceInfo) -> HashMap<String, Value> {
    let mut hash = info.hash;
    let mut members: HashMap<String, Value> = info
        .ids
        .into_iter()
        .map(|id| {
            let user_info = hash.remove(&id).unwrap_or(Value::Null);
            (id, user_info)
        })
        .collect();
    // servers that omit `ids` still send `hash`
    members.extend(hash);
    members
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

/// A presence channel: a [`Channel`] with a member roster.
#[derive(Debug, Clone)]
pub struct PresenceChannel {
    channel: Channel,
}

impl PresenceChannel {
    pub(crate) fn new(channel: Channel) -> PusherResult<Self> {
        if channel.kind() != ChannelKind::Presence {
            return Err(PusherError::InvalidChannel(format!(
                "invalid presence channel name, must start with 'presence-': {}",
                channel.name()
            )));
        }
        Ok(Self { channel })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Current members: user id → user info.
    pub async fn members(&self) -> HashMap<String, Value> {
        self.channel
            .with_roster(|r| r.members.clone())
            .await
            .unwrap_or_default()
    }

    pub async fn member(&self, user_id: &str) -> Option<Value> {
        self.channel
            .with_roster(|r| r.members.get(user_id).cloned())
            .await
            .flatten()
    }

    pub async fn member_count(&self) -> usize {
        self.channel
            .with_roster(|r| r.members.len())
            .await
            .unwrap_or(0)
    }

    /// This connection's own member entry, from the signed `channel_data`.
    pub async fn me(&self) -> Option<MemberData> {
        self.channel.with_roster(|r| r.me.clone()).await.flatten()
    }
}

impl std::ops::Deref for PresenceChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

/// The session's channel entries, keyed by name.
#[derive(Debug, Default)]
pub(crate) struct ChannelRegistry {
    channels: HashMap<String, Channel>,
}

impl ChannelRegistry {
    /// Existing entry for `name`, or a new one from `make`. The flag is true
    /// when the entry was created.
    pub(crate) fn get_or_insert(
        &mut self,
        name: &str,
        make: impl FnOnce() -> Channel,
    ) -> (Channel, bool) {
        if let Some(channel) = self.channels.get(name) {
            return (channel.clone(), false);
        }
        let channel = make();
        self.channels.insert(name.to_string(), channel.clone());
        (channel, true)
    }

    pub(crate) fn get(&self, name: &str) -> Option<Channel> {
        self.channels.get(name).cloned()
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Channel> {
        self.channels.remove(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }
}
