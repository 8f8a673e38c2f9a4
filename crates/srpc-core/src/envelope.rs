//! Wire envelope types and the JSON codec.
//!
//! Every frame on the wire is one [`Envelope`]: a correlation identifier plus
//! a payload that is either a [`Call`] or one of the two response kinds
//! ([`CallResult`] / [`CallError`]). The connection layer only ever looks at
//! the correlation id and the payload kind; call and result bodies are opaque
//! JSON values owned by the application.

use serde::{Deserialize, Serialize};

/// A single frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Opaque string tying a call to its eventual response.
    pub correlation_id: String,
    pub payload: Payload,
}

impl Envelope {
    /// Build a call envelope.
    pub fn call(correlation_id: impl Into<String>, call: Call) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: Payload::Call(call),
        }
    }

    /// Build a response envelope (result or error).
    pub fn response(correlation_id: impl Into<String>, response: Response) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: response.into_payload(),
        }
    }

    /// Serialize to a single text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a text frame received from the transport.
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// Payload variants, distinguished on the wire by the `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

/// An application-level request. The body is never inspected by the
/// connection layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub body: serde_json::Value,
}

impl Call {
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }
}

/// A successful answer to a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub body: serde_json::Value,
}

impl CallResult {
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }
}

/// An error answer to a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallError {
    pub code: ErrorCode,
    pub message: String,
}

impl CallError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// The answer to a call: either a [`CallResult`] or a [`CallError`].
///
/// This is what pending-call waiters receive and what handlers produce; it
/// covers exactly the two response payload kinds, never `Call`.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Result(CallResult),
    Error(CallError),
}

impl Response {
    /// A successful response with the given body.
    pub fn result(body: serde_json::Value) -> Self {
        Response::Result(CallResult::new(body))
    }

    /// An error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error(CallError::new(code, message))
    }

    pub fn into_payload(self) -> Payload {
        match self {
            Response::Result(r) => Payload::CallResult(r),
            Response::Error(e) => Payload::CallError(e),
        }
    }

    /// Convert into a `Result`, for callers that want `?` over application
    /// errors.
    pub fn into_result(self) -> Result<CallResult, CallError> {
        match self {
            Response::Result(r) => Ok(r),
            Response::Error(e) => Err(e),
        }
    }
}

/// Wire-level error codes carried by [`CallError`].
///
/// Encoded as a bare u32; codes this implementation does not know decode to
/// [`ErrorCode::Unknown`] so that a newer peer never breaks an older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", from = "u32")]
pub enum ErrorCode {
    /// Unrecognized code.
    Unknown,
    /// Application-defined failure, produced by the remote handler.
    Application,
    /// The remote handler failed while answering the call.
    Internal,
    /// The call arrived while the remote connection was shutting down.
    ConnectionClosing,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::Unknown => 0,
            ErrorCode::Application => 1,
            ErrorCode::Internal => 2,
            ErrorCode::ConnectionClosing => 3,
        }
    }

    pub fn from_u32(code: u32) -> Self {
        match code {
            1 => ErrorCode::Application,
            2 => ErrorCode::Internal,
            3 => ErrorCode::ConnectionClosing,
            _ => ErrorCode::Unknown,
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::Unknown => "unknown error",
            ErrorCode::Application => "application error",
            ErrorCode::Internal => "internal error",
            ErrorCode::ConnectionClosing => "connection is closing",
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> u32 {
        code.as_u32()
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> ErrorCode {
        ErrorCode::from_u32(code)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u32())
    }
}
