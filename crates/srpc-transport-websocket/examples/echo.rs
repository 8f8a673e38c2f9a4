//! Echo over a real WebSocket listener.
//!
//! Binds an ephemeral port, serves one connection where every call is
//! answered with its own body, runs one call against it, then closes
//! gracefully.
//!
//! ```sh
//! cargo run --example echo
//! ```

use std::io;
use std::sync::Arc;

use serde_json::json;
use srpc_core::{Call, Connection, Response, handler_fn};
use srpc_transport_websocket::{accept, connect};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "listening");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let transport = accept(stream).await?;
        let connection = Connection::new(
            transport,
            handler_fn(|call: Call| async move { Ok(Response::result(call.body)) }),
        );
        connection.run().await
    });

    let transport = connect(&format!("ws://{addr}")).await?;
    let connection = Connection::new(
        transport,
        handler_fn(|call: Call| async move { Ok(Response::result(call.body)) }),
    );
    tokio::spawn(Arc::clone(&connection).run());

    let response = connection
        .call(Call::new(json!({"echo": "hello over websocket"})))
        .await
        .map_err(io::Error::other)?;
    tracing::info!(?response, "echoed");

    connection.close().map_err(io::Error::other)?.await;
    server.await.expect("server task panicked")?;
    Ok(())
}
