// Pusher Channels protocol envelope and payload types.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Protocol version requested in the connection URL.
pub const PROTOCOL_VERSION: &str = "7";

// ── Event names ───────────────────────────────────────────────────────

pub const PUSHER_PING: &str = "pusher:ping";
pub const PUSHER_PONG: &str = "pusher:pong";
pub const PUSHER_ERROR: &str = "pusher:error";
pub const PUSHER_SUBSCRIBE: &str = "pusher:subscribe";
pub const PUSHER_UNSUBSCRIBE: &str = "pusher:unsubscribe";
pub const PUSHER_CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const PUSHER_SUBSCRIPTION_SUCCEEDED: &str = "pusher:subscription_succeeded";
pub const PUSHER_INTERNAL_SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
pub const PUSHER_INTERNAL_MEMBER_ADDED: &str = "pusher_internal:member_added";
pub const PUSHER_INTERNAL_MEMBER_REMOVED: &str = "pusher_internal:member_removed";

/// Event names the protocol layer consumes itself. These never reach
/// connection-level bindings.
pub const RESERVED_EVENTS: &[&str] = &[
    PUSHER_CONNECTION_ESTABLISHED,
    PUSHER_PING,
    PUSHER_PONG,
    PUSHER_ERROR,
    PUSHER_SUBSCRIPTION_SUCCEEDED,
    PUSHER_INTERNAL_SUBSCRIPTION_SUCCEEDED,
    PUSHER_INTERNAL_MEMBER_ADDED,
    PUSHER_INTERNAL_MEMBER_REMOVED,
];

/// Whether `event` is one of the protocol's reserved event names.
pub fn is_reserved(event: &str) -> bool {
    RESERVED_EVENTS.contains(&event)
}

// ── Envelope ──────────────────────────────────────────────────────────

/// The wire envelope: `{"event": ..., "channel": ..., "data": ...}`.
///
/// Server-originated `data` is a JSON string holding another JSON document
/// (double-encoding). Use [`crate::codec::unmarshal_data_string`] to unwrap it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Build a connection-level event (no channel).
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            channel: None,
            data,
        }
    }

    /// Build an event scoped to `channel`.
    pub fn on_channel(event: impl Into<String>, channel: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            channel: Some(channel.into()),
            data,
        }
    }

    /// `pusher:ping` with the double-encoded empty object as payload.
    pub fn ping() -> Self {
        Self::new(PUSHER_PING, Value::String("{}".into()))
    }

    /// `pusher:pong` with the double-encoded empty object as payload.
    pub fn pong() -> Self {
        Self::new(PUSHER_PONG, Value::String("{}".into()))
    }

    /// Channel name, or `""` for connection-level events.
    pub fn channel_name(&self) -> &str {
        self.channel.as_deref().unwrap_or("")
    }
}

// ── Payloads ──────────────────────────────────────────────────────────

/// Payload of `pusher:connection_established`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionData {
    pub socket_id: String,
    /// Server-suggested activity timeout in seconds.
    #[serde(default)]
    pub activity_timeout: u64,
}

/// Payload of `pusher:error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub code: Option<u32>,
    #[serde(default)]
    pub message: String,
}

/// Payload of `pusher:subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeData {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

/// Payload of `pusher:unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeData {
    pub channel: String,
}

/// Payload of `pusher_internal:subscription_succeeded` on a presence channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PresenceData {
    #[serde(default)]
    pub presence: PresenceInfo,
}

/// Initial member roster of a presence channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PresenceInfo {
    #[serde(default, deserialize_with = "member_ids")]
    pub ids: Vec<String>,
    #[serde(default)]
    pub hash: HashMap<String, Value>,
    #[serde(default)]
    pub count: usize,
}

/// Payload of `pusher_internal:member_added` / `member_removed`, and the
/// shape of presence `channel_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberData {
    #[serde(deserialize_with = "member_id")]
    pub user_id: String,
    #[serde(default)]
    pub user_info: Value,
}

/// Member ids arrive as strings or numbers depending on the server.
fn member_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "member id must be a string or number, got {other}"
        ))),
    }
}

fn member_ids<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let values = Vec::<Value>::deserialize(deserializer)?;
    values
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "member id must be a string or number, got {other}"
            ))),
        })
        .collect()
}
