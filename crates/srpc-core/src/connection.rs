//! The connection state machine and correlator.
//!
//! [`Connection`] owns a transport and mediates between it and the
//! application. Outgoing calls are registered in a correlation table and
//! matched to their eventual responses by correlation id. Incoming calls are
//! counted and dispatched to the application [`Handler`], and their answers
//! go back out over the same transport. Close sequencing guarantees the
//! transport is never torn down while responses to accepted incoming calls
//! are still owed.
//!
//! # Lifecycle
//!
//! ```text
//!          close() with zero in-flight calls, force_close(),
//!        ┌───────────────────── or disconnect ─────────────────────┐
//!        │                                                         ▼
//!      Open ────── close() with calls in flight ────▶ Closing ──▶ Closed
//!                                                     (drain)
//! ```
//!
//! While `Closing`, new outgoing calls are rejected and new incoming calls
//! are answered with a connection-closing error, but responses to calls
//! accepted earlier keep flowing; the transport closes once the last one is
//! out.
//!
//! # Usage
//!
//! ```ignore
//! let connection = Connection::new(transport, handler_fn(|call| async move {
//!     Ok(Response::result(call.body))
//! }));
//!
//! // Spawn the demux loop; it owns transport.recv().
//! tokio::spawn(connection.clone().run());
//!
//! let response = connection.call(Call::new(json!({"op": "sum"}))).await?;
//! connection.close()?.await;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    Call, CallFailure, CloseError, Envelope, ErrorCode, Handler, Payload, Response, Transport,
    next_correlation_id,
};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Calls flow in both directions.
    Open,
    /// Graceful close requested while incoming calls were in flight; their
    /// responses still go out, everything new is rejected.
    Closing,
    /// The transport is closed. Terminal.
    Closed,
}

/// Composite connection state.
///
/// Everything that must change together — lifecycle state, correlation
/// table, in-flight counter, close signal — lives here behind one lock.
struct Inner {
    state: ConnectionState,
    /// Correlation table: id → waiter for the eventual response. Entries
    /// never expire on their own.
    pending: HashMap<String, oneshot::Sender<Response>>,
    /// Incoming calls accepted but not yet answered (or abandoned).
    in_flight: usize,
    /// Created by the one successful `close()`; completed exactly once, when
    /// the connection has fully closed.
    close_signal: Option<oneshot::Sender<()>>,
}

impl Inner {
    fn complete_close_signal(&mut self) {
        if let Some(signal) = self.close_signal.take() {
            // The waiter may have dropped its CloseCompletion; fine.
            let _ = signal.send(());
        }
    }
}

/// A correlation-layer connection over one transport.
///
/// Construct with [`Connection::new`], spawn [`run`](Self::run) once, then
/// issue [`call`](Self::call)s from any task.
///
/// # Key invariant
///
/// The composite state — lifecycle, correlation table, in-flight counter,
/// close signal — sits behind a single lock, and every compound transition
/// (register-then-send, decrement-then-maybe-close) does its bookkeeping in
/// one critical section. The lock is never held across an await: handler
/// invocation and transport I/O happen outside it.
pub struct Connection<T: Transport, H: Handler> {
    transport: T,
    handler: H,
    inner: Mutex<Inner>,
}

impl<T: Transport, H: Handler> Connection<T, H> {
    /// Wrap a transport and an application handler into a live connection.
    ///
    /// The connection starts `Open`; nothing moves until [`run`](Self::run)
    /// is spawned.
    pub fn new(transport: T, handler: H) -> Arc<Self> {
        Arc::new(Self {
            transport,
            handler,
            inner: Mutex::new(Inner {
                state: ConnectionState::Open,
                pending: HashMap::new(),
                in_flight: 0,
                close_signal: None,
            }),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Number of outgoing calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Number of incoming calls accepted but not yet answered.
    pub fn in_flight_calls(&self) -> usize {
        self.inner.lock().in_flight
    }

    /// The owned transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Issue an outgoing call and wait for the matching response.
    ///
    /// A fresh correlation identifier is generated and a waiter registered
    /// under it before the envelope is handed to the transport; the demux
    /// loop resolves the waiter when a response with the same id arrives.
    ///
    /// Fails immediately with [`CallFailure::Closed`] while the connection
    /// is closing or closed (nothing is transmitted), and with
    /// [`CallFailure::Encode`] / [`CallFailure::Io`] when the envelope
    /// cannot be serialized or sent. A send failure leaves the waiter
    /// registered: the identifier burns, and the entry lives until the
    /// connection goes away.
    ///
    /// There is no built-in timeout; a response that never arrives leaves
    /// this future pending forever. Callers that need bounded waits wrap it
    /// in `tokio::time::timeout`.
    pub async fn call(&self, call: Call) -> Result<Response, CallFailure> {
        let (correlation_id, rx) = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Open {
                return Err(CallFailure::Closed);
            }
            let correlation_id = next_correlation_id();
            let (tx, rx) = oneshot::channel();
            inner.pending.insert(correlation_id.clone(), tx);
            (correlation_id, rx)
        };

        debug!(correlation_id = %correlation_id, "sending call");
        let frame = Envelope::call(correlation_id, call).encode()?;
        self.transport.send(frame).await?;

        rx.await.map_err(|_| CallFailure::ConnectionGone)
    }

    /// Request a graceful close.
    ///
    /// With no incoming calls in flight the transport closes on the spot and
    /// the returned [`CloseCompletion`] is already resolved. Otherwise the
    /// connection enters `Closing` and the transport stays open until the
    /// last accepted incoming call has been answered.
    ///
    /// Not idempotent: calling while already closing or closed returns
    /// [`CloseError::AlreadyClosed`]. Only the first caller gets the
    /// completion signal.
    pub fn close(&self) -> Result<CloseCompletion, CloseError> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Open {
            return Err(CloseError::AlreadyClosed);
        }
        inner.close_signal = Some(tx);
        if inner.in_flight == 0 {
            inner.state = ConnectionState::Closed;
            // Close the transport before releasing the signal: a completion
            // that has resolved implies the transport close was initiated.
            self.transport.close();
            inner.complete_close_signal();
            debug!("closed immediately; no incoming calls in flight");
        } else {
            inner.state = ConnectionState::Closing;
            debug!(
                in_flight = inner.in_flight,
                "closing; draining in-flight incoming calls"
            );
        }
        Ok(CloseCompletion { rx })
    }

    /// Close the transport immediately, abandoning outstanding work.
    ///
    /// Pending outgoing calls stay registered and unresolved, and a
    /// completion signal handed out by an earlier [`close`](Self::close) is
    /// not completed here — it only fires if in-flight incoming calls later
    /// drain to zero. Idempotent.
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Closed {
            return;
        }
        inner.state = ConnectionState::Closed;
        self.transport.close();
        debug!(
            pending = inner.pending.len(),
            in_flight = inner.in_flight,
            "force-closed"
        );
    }

    /// Run the demux loop.
    ///
    /// # Key invariant
    ///
    /// Only `run` calls `transport.recv()`. Each inbound frame is decoded
    /// and routed: call payloads to the handler, response payloads to the
    /// correlation table. Undecodable frames are logged and skipped. When
    /// the transport ends — locally closed or the peer disconnected — the
    /// connection is marked closed, the handler's disconnect hook fires
    /// once, and the loop returns: `Ok(())` on a clean end, the read error
    /// otherwise.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        loop {
            let frame = match self.transport.recv().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.handle_disconnect();
                    return Ok(());
                }
                Err(e) => {
                    self.handle_disconnect();
                    return Err(e);
                }
            };

            let envelope = match Envelope::decode(&frame) {
                Ok(envelope) => envelope,
                Err(error) => {
                    warn!(error = %error, "failed to decode inbound frame; skipping");
                    continue;
                }
            };

            match envelope.payload {
                Payload::Call(call) => self.accept_incoming_call(envelope.correlation_id, call),
                Payload::CallResult(result) => {
                    self.resolve_pending(envelope.correlation_id, Response::Result(result));
                }
                Payload::CallError(error) => {
                    self.resolve_pending(envelope.correlation_id, Response::Error(error));
                }
            }
        }
    }

    /// Route one inbound call: dispatch to the handler while open, answer
    /// with a connection-closing error otherwise.
    fn accept_incoming_call(self: &Arc<Self>, correlation_id: String, call: Call) {
        let accepted = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Open => {
                    inner.in_flight += 1;
                    true
                }
                ConnectionState::Closing | ConnectionState::Closed => false,
            }
        };

        let conn = Arc::clone(self);
        if accepted {
            debug!(correlation_id = %correlation_id, "dispatching incoming call");
            // The handler runs on its own task so a slow call never stalls
            // the demux loop.
            tokio::spawn(async move {
                let response = match conn.handler.on_call(call).await {
                    Ok(response) => response,
                    Err(error) => {
                        warn!(
                            correlation_id = %correlation_id,
                            error = %error,
                            "handler failed; answering with an internal error"
                        );
                        Response::error(ErrorCode::Internal, "internal error")
                    }
                };
                conn.finish_incoming_call(&correlation_id, response).await;
            });
        } else {
            debug!(correlation_id = %correlation_id, "rejecting call received while closing");
            tokio::spawn(async move {
                let response =
                    Response::error(ErrorCode::ConnectionClosing, "connection is closing");
                conn.send_response(&correlation_id, response).await;
            });
        }
    }

    /// Deliver an inbound response to the waiter registered under its
    /// correlation id.
    fn resolve_pending(&self, correlation_id: String, response: Response) {
        let waiter = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Closed {
                debug!(correlation_id = %correlation_id, "response arrived after close; dropping");
                return;
            }
            inner.pending.remove(&correlation_id)
        };
        match waiter {
            Some(tx) => {
                // The waiter may have stopped listening (e.g. a timeout
                // wrapped around the call future); a dead receiver is not an
                // error.
                let _ = tx.send(response);
            }
            None => {
                warn!(correlation_id = %correlation_id, "response matches no pending call; dropping");
            }
        }
    }

    /// Transmit a response envelope for an incoming call, unless the
    /// connection is already closed.
    ///
    /// Failures are absorbed: answering an incoming call must never take the
    /// demux loop or its dispatch task down.
    async fn send_response(&self, correlation_id: &str, response: Response) {
        if self.inner.lock().state == ConnectionState::Closed {
            warn!(correlation_id = %correlation_id, "connection closed; response not delivered");
            return;
        }
        match Envelope::response(correlation_id, response).encode() {
            Ok(frame) => {
                if let Err(error) = self.transport.send(frame).await {
                    warn!(correlation_id = %correlation_id, error = %error, "failed to send response");
                }
            }
            Err(error) => {
                warn!(correlation_id = %correlation_id, error = %error, "failed to encode response");
            }
        }
    }

    /// Answer an accepted incoming call and retire it from the in-flight
    /// count; the last one out performs the deferred graceful close.
    async fn finish_incoming_call(&self, correlation_id: &str, response: Response) {
        self.send_response(correlation_id, response).await;

        // Decrement-then-maybe-close is one critical section: nobody may
        // observe a zero counter with the close still pending.
        let mut inner = self.inner.lock();
        inner.in_flight -= 1;
        if inner.in_flight > 0 {
            return;
        }
        match inner.state {
            ConnectionState::Closing => {
                inner.state = ConnectionState::Closed;
                self.transport.close();
                inner.complete_close_signal();
                debug!("last in-flight call answered; closed");
            }
            ConnectionState::Closed => {
                // Force close or remote disconnect got here first; the
                // transport is gone, but a close() waiter may still be owed
                // its signal.
                inner.complete_close_signal();
            }
            ConnectionState::Open => {}
        }
    }

    /// Transition to closed after the transport ended, then fire the
    /// application's disconnect hook.
    ///
    /// Pending outgoing calls stay registered and unresolved, and the
    /// in-flight counter keeps its value; handlers still running find the
    /// connection closed when they try to answer.
    fn handle_disconnect(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Closed {
                debug!(
                    pending = inner.pending.len(),
                    in_flight = inner.in_flight,
                    "transport disconnected"
                );
            }
            inner.state = ConnectionState::Closed;
            self.transport.close();
        }
        self.handler.on_disconnect();
    }
}

/// Completion signal returned by [`Connection::close`].
///
/// Resolves once the connection has fully closed: immediately when the close
/// was immediate, otherwise when the last in-flight incoming call drains. If
/// the connection itself is dropped the signal resolves too — nothing is
/// owed anymore.
#[derive(Debug)]
pub struct CloseCompletion {
    rx: oneshot::Receiver<()>,
}

impl Future for CloseCompletion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}

// Note: Connection tests live in srpc-testkit to avoid circular
// dev-dependencies between srpc-core and srpc-transport-mem. See the testkit
// for scenario and property coverage.
