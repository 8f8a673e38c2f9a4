//! Transport abstraction.

use std::io;

/// Trait for transports that carry serialized envelope frames.
///
/// Implementations:
/// - `MemoryTransport` from `srpc-transport-mem` for in-process pairs
/// - `WebSocketTransport` from `srpc-transport-websocket`
///
/// A transport is owned exclusively by one [`Connection`](crate::Connection):
/// only the connection sends to it, closes it, and drives `recv`.
pub trait Transport: Send + Sync + 'static {
    /// Send one serialized frame to the peer.
    ///
    /// After [`close`](Transport::close) this must return an error or quietly
    /// drop the frame, never panic.
    fn send(&self, frame: String) -> impl std::future::Future<Output = io::Result<()>> + Send;

    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` once the transport has closed, whether locally or
    /// by the peer.
    fn recv(&self) -> impl std::future::Future<Output = io::Result<Option<String>>> + Send;

    /// Signal the transport to close.
    ///
    /// Synchronous and idempotent. The physical teardown (close handshake,
    /// socket shutdown) may complete in the background; `is_closed` reports
    /// true from the moment the close has been signalled.
    fn close(&self);

    /// Whether `close` has been signalled or the peer has disconnected.
    fn is_closed(&self) -> bool;
}
