//! A scripted transport, plus the connection scenario tests that use it.
//!
//! The tests at the bottom cover the connection state machine end to end
//! over the in-process transport; they live here rather than in `srpc-core`
//! to avoid circular dev-dependencies (see the crate docs).

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use srpc_core::Transport;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;

/// A transport the test drives by hand: inbound frames are pushed one at a
/// time and everything sent is recorded.
///
/// Unlike a real transport, `close` only flips the closed flag — it does not
/// wake a blocked `recv` — so a test can keep injecting frames after a close
/// to exercise the late-arrival paths. [`finish`](StubTransport::finish)
/// ends the inbound stream.
pub struct StubTransport {
    fail_sends: bool,
    sent: Mutex<Vec<String>>,
    inbound_tx: mpsc::UnboundedSender<Option<String>>,
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Option<String>>>,
    closed: AtomicBool,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A stub whose sends all fail with a broken-pipe error.
    pub fn failing() -> Self {
        Self::build(true)
    }

    fn build(fail_sends: bool) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            fail_sends,
            sent: Mutex::new(Vec::new()),
            inbound_tx,
            inbound: AsyncMutex::new(inbound_rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue one inbound frame for the demux loop.
    pub fn push(&self, frame: String) {
        // The receiver lives in self; the channel can't be gone.
        let _ = self.inbound_tx.send(Some(frame));
    }

    /// End the inbound stream; `recv` reports a clean close.
    pub fn finish(&self) {
        let _ = self.inbound_tx.send(None);
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

impl Default for StubTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for StubTransport {
    async fn send(&self, frame: String) -> io::Result<()> {
        if self.fail_sends {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted send failure",
            ));
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn recv(&self) -> io::Result<Option<String>> {
        match self.inbound.lock().await.recv().await {
            Some(Some(frame)) => Ok(Some(frame)),
            Some(None) | None => Ok(None),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
