//! srpc-core: Core types and the connection engine for the srpc correlation layer.
//!
//! srpc sits between a message-oriented transport (which delivers opaque text
//! frames) and an application (which issues and answers calls). This crate
//! defines:
//! - Wire envelope and payload types ([`Envelope`], [`Payload`], [`Response`],
//!   [`ErrorCode`])
//! - The transport abstraction ([`Transport`])
//! - The application handler trait ([`Handler`], [`handler_fn`])
//! - Error types ([`CallFailure`], [`CloseError`])
//! - The connection state machine and correlator ([`Connection`])
//!
//! Transports live in their own crates (`srpc-transport-mem`,
//! `srpc-transport-websocket`).

#![forbid(unsafe_code)]

mod connection;
mod envelope;
mod error;
mod handler;
mod id;
mod transport;

pub use connection::*;
pub use envelope::*;
pub use error::*;
pub use handler::*;
pub use id::*;
pub use transport::*;
