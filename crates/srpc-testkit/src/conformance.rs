//! Conformance scenarios every transport must pass.
//!
//! Each `run_*` function wires two [`Connection`]s over a factory-provided
//! transport pair and drives one behavior end to end. Transport crates call
//! them from a `conformance_tests` module; failures panic, so each one slots
//! straight into a `#[tokio::test]`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;
use srpc_core::{
    Call, CallFailure, Connection, ConnectionState, ErrorCode, Handler, Response, Transport,
};
use tokio::task::JoinHandle;

use crate::TransportFactory;
use crate::handlers::{EchoHandler, FailingHandler, GatedHandler};

/// Poll until `condition` holds, panicking if it doesn't within a second.
///
/// Counter and state probes trail the demux loop by a task hop or two; tests
/// that assert on them need a little slack.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached within one second");
}

/// Two connections over a fresh transport pair, demux loops spawned.
async fn linked<F, CH, SH>(
    client_handler: Arc<CH>,
    server_handler: Arc<SH>,
) -> (
    Arc<Connection<F::Transport, Arc<CH>>>,
    Arc<Connection<F::Transport, Arc<SH>>>,
    JoinHandle<io::Result<()>>,
    JoinHandle<io::Result<()>>,
)
where
    F: TransportFactory,
    CH: Handler,
    SH: Handler,
{
    let (client_side, server_side) = F::connect_pair().await.expect("transport pair");
    let client = Connection::new(client_side, client_handler);
    let server = Connection::new(server_side, server_handler);
    let client_loop = tokio::spawn(Arc::clone(&client).run());
    let server_loop = tokio::spawn(Arc::clone(&server).run());
    (client, server, client_loop, server_loop)
}

/// One echoed call: the response resolves the registered waiter and clears
/// the correlation table.
pub async fn run_call_round_trip<F: TransportFactory>() {
    let server_handler = EchoHandler::new();
    let (client, server, client_loop, server_loop) =
        linked::<F, _, _>(EchoHandler::new(), Arc::clone(&server_handler)).await;

    let body = json!({"op": "ping", "seq": 1});
    let response = client
        .call(Call::new(body.clone()))
        .await
        .expect("call failed");
    assert_eq!(response, Response::result(body));
    assert_eq!(server_handler.calls(), 1);
    assert_eq!(client.pending_calls(), 0);
    wait_until(|| server.in_flight_calls() == 0).await;

    client_loop.abort();
    server_loop.abort();
}

/// Interleaved calls each land on their own waiter, whatever the response
/// order.
pub async fn run_concurrent_calls<F: TransportFactory>() {
    let server_handler = EchoHandler::new();
    let (client, _server, client_loop, server_loop) =
        linked::<F, _, _>(EchoHandler::new(), Arc::clone(&server_handler)).await;

    let mut calls = Vec::new();
    for seq in 0..8 {
        let client = Arc::clone(&client);
        calls.push(tokio::spawn(async move {
            let body = json!({"seq": seq});
            let response = client
                .call(Call::new(body.clone()))
                .await
                .expect("call failed");
            assert_eq!(response, Response::result(body));
        }));
    }
    for call in calls {
        call.await.expect("call task panicked");
    }
    assert_eq!(client.pending_calls(), 0);
    assert_eq!(server_handler.calls(), 8);

    client_loop.abort();
    server_loop.abort();
}

/// After a local close, new calls fail fast and nothing reaches the peer.
pub async fn run_close_rejects_new_calls<F: TransportFactory>() {
    let server_handler = EchoHandler::new();
    let (client, server, client_loop, server_loop) =
        linked::<F, _, _>(EchoHandler::new(), Arc::clone(&server_handler)).await;

    client.close().expect("close").await;
    assert_eq!(client.state(), ConnectionState::Closed);

    let failure = client.call(Call::new(json!("late"))).await.unwrap_err();
    assert!(matches!(failure, CallFailure::Closed), "got {failure:?}");
    assert_eq!(client.pending_calls(), 0);

    // The peer saw nothing but the transport closing.
    wait_until(|| server.state() == ConnectionState::Closed).await;
    assert_eq!(server_handler.calls(), 0);

    assert!(client_loop.await.expect("demux loop panicked").is_ok());
    assert!(server_loop.await.expect("demux loop panicked").is_ok());
}

/// A close with calls in flight defers teardown until the last response is
/// out, then completes.
pub async fn run_graceful_close_drains<F: TransportFactory>() {
    let server_handler = GatedHandler::new();
    let (client, server, client_loop, server_loop) =
        linked::<F, _, _>(EchoHandler::new(), Arc::clone(&server_handler)).await;

    let first = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.call(Call::new(json!(1))).await }
    });
    let second = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.call(Call::new(json!(2))).await }
    });
    wait_until(|| server.in_flight_calls() == 2).await;

    let mut completion = server.close().expect("close");
    assert_eq!(server.state(), ConnectionState::Closing);
    assert!(!server.transport().is_closed());
    assert!((&mut completion).now_or_never().is_none());

    server_handler.release();
    wait_until(|| server.in_flight_calls() == 1).await;
    assert_eq!(server.state(), ConnectionState::Closing);
    assert!((&mut completion).now_or_never().is_none());

    server_handler.release();
    completion.await;
    assert_eq!(server.state(), ConnectionState::Closed);
    assert!(server.transport().is_closed());

    // Both callers still got their answers; the close waited for them.
    assert_eq!(
        first.await.expect("join").expect("first call"),
        Response::result(json!(1))
    );
    assert_eq!(
        second.await.expect("join").expect("second call"),
        Response::result(json!(2))
    );

    client_loop.abort();
    server_loop.abort();
}

/// New calls reaching a draining connection are answered with the
/// connection-closing error and never touch the handler.
pub async fn run_reject_while_closing<F: TransportFactory>() {
    let server_handler = GatedHandler::new();
    let (client, server, client_loop, server_loop) =
        linked::<F, _, _>(EchoHandler::new(), Arc::clone(&server_handler)).await;

    let held = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.call(Call::new(json!("held"))).await }
    });
    wait_until(|| server.in_flight_calls() == 1 && server_handler.calls() == 1).await;

    let completion = server.close().expect("close");
    assert_eq!(server.state(), ConnectionState::Closing);

    let rejection = client
        .call(Call::new(json!("late")))
        .await
        .expect("the rejection still arrives as a response");
    match rejection {
        Response::Error(error) => {
            assert_eq!(error.code, ErrorCode::ConnectionClosing);
            assert_eq!(error.message, "connection is closing");
        }
        Response::Result(value) => panic!("expected a rejection, got {value:?}"),
    }
    assert_eq!(server_handler.calls(), 1);
    assert_eq!(server.in_flight_calls(), 1);

    server_handler.release();
    completion.await;
    assert_eq!(
        held.await.expect("join").expect("held call"),
        Response::result(json!("held"))
    );

    client_loop.abort();
    server_loop.abort();
}

/// Handler failures never poison the connection: the caller gets an
/// internal-error response and the connection keeps serving.
pub async fn run_handler_failure_internal_error<F: TransportFactory>() {
    let server_handler = FailingHandler::new();
    let (client, server, client_loop, server_loop) =
        linked::<F, _, _>(EchoHandler::new(), Arc::clone(&server_handler)).await;

    let response = client
        .call(Call::new(json!("boom")))
        .await
        .expect("call failed");
    match response {
        Response::Error(error) => {
            assert_eq!(error.code, ErrorCode::Internal);
            assert_eq!(error.message, "internal error");
        }
        Response::Result(value) => panic!("expected an error response, got {value:?}"),
    }
    assert_eq!(server_handler.calls(), 1);
    wait_until(|| server.in_flight_calls() == 0).await;
    assert_eq!(server.state(), ConnectionState::Open);

    client_loop.abort();
    server_loop.abort();
}

/// A dropped peer surfaces as a clean end: state goes closed and the
/// disconnect hook fires exactly once on each side.
pub async fn run_disconnect_fires_hook<F: TransportFactory>() {
    let client_handler = EchoHandler::new();
    let server_handler = EchoHandler::new();
    let (client, server, client_loop, server_loop) =
        linked::<F, _, _>(Arc::clone(&client_handler), Arc::clone(&server_handler)).await;

    client.force_close();
    assert_eq!(client.state(), ConnectionState::Closed);

    wait_until(|| server.state() == ConnectionState::Closed).await;
    assert!(client_loop.await.expect("demux loop panicked").is_ok());
    assert!(server_loop.await.expect("demux loop panicked").is_ok());
    assert_eq!(client_handler.disconnects(), 1);
    assert_eq!(server_handler.disconnects(), 1);
}
