//! Shared application handlers for the conformance scenarios and the
//! connection tests.
//!
//! All of them count invocations and disconnects, so tests can assert what
//! did (or did not) reach the application.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use srpc_core::{Call, Handler, HandlerFuture, Response};
use tokio::sync::Semaphore;

/// Answers every call with its own body.
pub struct EchoHandler {
    calls: AtomicUsize,
    disconnects: AtomicUsize,
}

impl EchoHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Handler for EchoHandler {
    fn on_call(&self, call: Call) -> HandlerFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(Response::result(call.body)) })
    }

    fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Holds every accepted call until the test releases it, then echoes the
/// call body back. Drives the draining scenarios.
pub struct GatedHandler {
    gate: Arc<Semaphore>,
    calls: AtomicUsize,
    disconnects: AtomicUsize,
}

impl GatedHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Arc::new(Semaphore::new(0)),
            calls: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    /// Let one held call answer.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Calls that reached the handler; rejected calls never do.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Handler for GatedHandler {
    fn on_call(&self, call: Call) -> HandlerFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = Arc::clone(&self.gate);
        Box::pin(async move {
            let permit = gate
                .acquire_owned()
                .await
                .expect("gate semaphore is never closed");
            // Consume the permit for good: one release lets exactly one call
            // through.
            permit.forget();
            Ok(Response::result(call.body))
        })
    }

    fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fails every call; the connection must turn each failure into an
/// internal-error response on the wire.
pub struct FailingHandler {
    calls: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FailingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Handler for FailingHandler {
    fn on_call(&self, _call: Call) -> HandlerFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err("handler blew up".into()) })
    }

    fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
