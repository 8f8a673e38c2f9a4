//! In-process transport pair for srpc.
//!
//! [`MemoryTransport::pair`] builds two connected transports over a pair of
//! unbounded channels, one per direction. Closing either side closes the
//! pair, like a socket: the shared closed flag flips for both halves and a
//! close sentinel wakes a blocked `recv` on either end. Frames queued before
//! the close are still delivered, in order, before `recv` reports the end.
//!
//! This is the reference transport for connection-level tests; see
//! `srpc-testkit`.

#![forbid(unsafe_code)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use srpc_core::Transport;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;

/// One half of an in-process transport pair.
///
/// Dropping a half closes the pair, same as [`Transport::close`].
pub struct MemoryTransport {
    /// Frames (`Some`) and close sentinels (`None`) to the peer half.
    to_peer: mpsc::UnboundedSender<Option<String>>,
    /// Sentinel path into our own inbox, so a local `close` wakes a blocked
    /// local `recv`.
    to_self: mpsc::UnboundedSender<Option<String>>,
    inbox: AsyncMutex<Inbox>,
    /// Shared with the peer half: either side closing closes the pair.
    closed: Arc<AtomicBool>,
}

struct Inbox {
    rx: mpsc::UnboundedReceiver<Option<String>>,
    /// Set once a sentinel has been consumed; later `recv` calls return
    /// `Ok(None)` without touching the channel again.
    done: bool,
}

impl MemoryTransport {
    /// Create a connected pair.
    pub fn pair() -> (Self, Self) {
        let (a_to_b, b_inbox) = mpsc::unbounded_channel();
        let (b_to_a, a_inbox) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let a = Self {
            to_peer: a_to_b.clone(),
            to_self: b_to_a.clone(),
            inbox: AsyncMutex::new(Inbox {
                rx: a_inbox,
                done: false,
            }),
            closed: Arc::clone(&closed),
        };
        let b = Self {
            to_peer: b_to_a,
            to_self: a_to_b,
            inbox: AsyncMutex::new(Inbox {
                rx: b_inbox,
                done: false,
            }),
            closed,
        };
        (a, b)
    }
}

impl Transport for MemoryTransport {
    async fn send(&self, frame: String) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"));
        }
        self.to_peer
            .send(Some(frame))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer inbox gone"))
    }

    async fn recv(&self) -> io::Result<Option<String>> {
        let mut inbox = self.inbox.lock().await;
        if inbox.done {
            return Ok(None);
        }
        match inbox.rx.recv().await {
            Some(Some(frame)) => Ok(Some(frame)),
            // A close sentinel, or every sender into this inbox is gone.
            Some(None) | None => {
                inbox.done = true;
                self.closed.store(true, Ordering::Release);
                Ok(None)
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wake both inboxes; a blocked recv on either end must observe the
        // close. Frames already queued are delivered first.
        let _ = self.to_peer.send(None);
        let _ = self.to_self.send(None);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        // Each half keeps a sender into its own inbox alive, so the channel
        // never closes on its own; an explicit sentinel stands in for the
        // socket going away.
        self.close();
    }
}


/// Conformance tests using srpc-testkit.
#[cfg(test)]
mod conformance_tests {
    use super::*;
    use srpc_testkit::{TestError, TransportFactory};

    struct MemoryFactory;

    impl TransportFactory for MemoryFactory {
        type Transport = MemoryTransport;

        async fn connect_pair() -> Result<(Self::Transport, Self::Transport), TestError> {
            Ok(MemoryTransport::pair())
        }
    }

    #[tokio::test]
    async fn call_round_trip() {
        srpc_testkit::run_call_round_trip::<MemoryFactory>().await;
    }

    #[tokio::test]
    async fn concurrent_calls() {
        srpc_testkit::run_concurrent_calls::<MemoryFactory>().await;
    }

    #[tokio::test]
    async fn close_rejects_new_calls() {
        srpc_testkit::run_close_rejects_new_calls::<MemoryFactory>().await;
    }

    #[tokio::test]
    async fn graceful_close_drains() {
        srpc_testkit::run_graceful_close_drains::<MemoryFactory>().await;
    }

    #[tokio::test]
    async fn reject_while_closing() {
        srpc_testkit::run_reject_while_closing::<MemoryFactory>().await;
    }

    #[tokio::test]
    async fn handler_failure_maps_to_internal_error() {
        srpc_testkit::run_handler_failure_internal_error::<MemoryFactory>().await;
    }

    #[tokio::test]
    async fn disconnect_fires_hook() {
        srpc_testkit::run_disconnect_fires_hook::<MemoryFactory>().await;
    }
}
