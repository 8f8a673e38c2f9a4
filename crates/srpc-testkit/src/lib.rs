//! srpc-testkit: shared test tooling for srpc transports and connections.
//!
//! Provides the [`TransportFactory`] trait plus conformance scenarios every
//! transport must pass, shared application handlers, and a scripted
//! [`StubTransport`] for driving connection edge cases by hand.
//!
//! Connection-level tests live in this crate rather than in `srpc-core` to
//! avoid circular dev-dependencies between the core and the transport
//! crates.
//!
//! # Usage
//!
//! Each transport crate implements [`TransportFactory`] and runs the shared
//! scenarios:
//!
//! ```ignore
//! struct MyTransportFactory;
//!
//! impl TransportFactory for MyTransportFactory {
//!     type Transport = MyTransport;
//!
//!     async fn connect_pair() -> Result<(Self::Transport, Self::Transport), TestError> {
//!         // create a connected pair
//!     }
//! }
//!
//! #[tokio::test]
//! async fn my_transport_call_round_trip() {
//!     srpc_testkit::run_call_round_trip::<MyTransportFactory>().await;
//! }
//! ```

#![forbid(unsafe_code)]

mod conformance;
mod connection;
mod handlers;

pub use conformance::*;
pub use connection::StubTransport;
pub use handlers::*;

use std::fmt;
use std::future::Future;
use std::io;

use srpc_core::Transport;

/// Error from a factory failing to produce a connected transport pair.
#[derive(Debug)]
pub struct TestError(pub String);

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TestError {}

impl From<io::Error> for TestError {
    fn from(e: io::Error) -> Self {
        Self(e.to_string())
    }
}

/// Builds connected transport pairs for the conformance scenarios.
pub trait TransportFactory {
    type Transport: Transport;

    /// Create a connected pair: frames sent on one side arrive on the other.
    fn connect_pair()
    -> impl Future<Output = Result<(Self::Transport, Self::Transport), TestError>> + Send;
}
