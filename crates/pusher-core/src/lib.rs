//! pusher-core: Shared protocol library for pusher-ws.
//!
//! Provides the Pusher Channels envelope and payload types, reserved event
//! names, JSON framing with the double-encoding helpers, the error type, and
//! the abstract frame transport traits.

pub mod codec;
pub mod error;
pub mod messages;
pub mod transport;

// Re-export commonly used items at crate root.
pub use codec::{decode_event, encode_event, extract_event_error, marshal_data_string, unmarshal_data_string};
pub use error::{PusherError, PusherResult};
pub use messages::{is_reserved, Event, PROTOCOL_VERSION};
pub use transport::{FrameSink, FrameSource, Transport};
