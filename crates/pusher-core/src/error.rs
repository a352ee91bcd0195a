use thiserror::Error;

/// Errors produced by the Pusher protocol layer.
///
/// `Clone` so a single read-loop failure can be forwarded to the error
/// channel and kept as the session's disconnect cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PusherError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("unexpected handshake event: {0}")]
    UnexpectedHandshake(String),

    #[error("pusher error{}: {message}", code.map(|c| format!(" {c}")).unwrap_or_default())]
    Protocol { code: Option<u32>, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    #[error("not connected")]
    NotConnected,

    #[error("timeout")]
    Timeout,

    #[error("pusher connection closed with error: {0}")]
    Closed(Box<PusherError>),
}

impl From<serde_json::Error> for PusherError {
    fn from(e: serde_json::Error) -> Self {
        PusherError::Codec(e.to_string())
    }
}

pub type PusherResult<T> = Result<T, PusherError>;
