//! Error types for issuing calls and closing connections.

use std::io;

/// Boxed error returned by application handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error from issuing an outgoing call.
#[derive(Debug)]
pub enum CallFailure {
    /// The connection was already closing or closed; nothing was sent.
    Closed,
    /// Failed to serialize the call envelope.
    Encode(serde_json::Error),
    /// The transport rejected the send.
    Io(io::Error),
    /// The connection was dropped while the caller was still awaiting its
    /// response.
    ConnectionGone,
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallFailure::Closed => write!(f, "connection already closed"),
            CallFailure::Encode(e) => write!(f, "encode error: {e}"),
            CallFailure::Io(e) => write!(f, "send error: {e}"),
            CallFailure::ConnectionGone => write!(f, "connection dropped before the response arrived"),
        }
    }
}

impl std::error::Error for CallFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallFailure::Encode(e) => Some(e),
            CallFailure::Io(e) => Some(e),
            CallFailure::Closed | CallFailure::ConnectionGone => None,
        }
    }
}

impl From<serde_json::Error> for CallFailure {
    fn from(e: serde_json::Error) -> Self {
        CallFailure::Encode(e)
    }
}

impl From<io::Error> for CallFailure {
    fn from(e: io::Error) -> Self {
        CallFailure::Io(e)
    }
}

/// Error from requesting a graceful close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseError {
    /// `close` was called while the connection was already closing or
    /// closed. Graceful close is not idempotent; only the first caller gets
    /// the completion signal.
    AlreadyClosed,
}

impl std::fmt::Display for CloseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseError::AlreadyClosed => write!(f, "connection already closing or closed"),
        }
    }
}

impl std::error::Error for CloseError {}
