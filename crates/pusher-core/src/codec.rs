//! JSON text framing for Pusher envelopes, plus the double-encoding helpers.
//!
//! Every WebSocket text frame carries exactly one [`Event`]. Server payloads
//! are double-encoded: `data` is a JSON string whose contents are JSON.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{PusherError, PusherResult};
use crate::messages::{ErrorData, Event};

/// Encode an envelope into a text frame.
pub fn encode_event(event: &Event) -> PusherResult<String> {
    Ok(serde_json::to_string(event)?)
}

/// Decode a text frame into an envelope.
pub fn decode_event(text: &str) -> PusherResult<Event> {
    Ok(serde_json::from_str(text)?)
}

/// Unwrap a double-encoded payload: `data` must be a JSON string, whose
/// contents are decoded into `T`.
pub fn unmarshal_data_string<T: DeserializeOwned>(data: &Value) -> PusherResult<T> {
    let inner = data.as_str().ok_or_else(|| {
        PusherError::Codec(format!("expected double-encoded string payload, got {data}"))
    })?;
    Ok(serde_json::from_str(inner)?)
}

/// Produce a double-encoded payload from any serializable value.
pub fn marshal_data_string<T: Serialize>(value: &T) -> PusherResult<Value> {
    Ok(Value::String(serde_json::to_string(value)?))
}

/// Turn a `pusher:error` envelope into a [`PusherError::Protocol`].
///
/// Servers send the error payload either as a plain object or double-encoded;
/// both are accepted.
pub fn extract_event_error(event: &Event) -> PusherError {
    let parsed = match &event.data {
        Value::String(_) => unmarshal_data_string::<ErrorData>(&event.data),
        other => serde_json::from_value::<ErrorData>(other.clone()).map_err(PusherError::from),
    };

    match parsed {
        Ok(data) => PusherError::Protocol {
            code: data.code,
            message: data.message,
        },
        Err(e) => PusherError::Codec(format!("malformed pusher:error payload: {e}")),
    }
}
