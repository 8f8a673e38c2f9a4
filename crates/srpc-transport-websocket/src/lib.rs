//! WebSocket transport for srpc.
//!
//! JSON envelopes ride as WebSocket text frames. The read half sits behind
//! an async mutex and is drained by the connection's demux loop; the write
//! half is owned by a spawned writer task fed through a command channel, so
//! [`Transport::close`] is a synchronous enqueue of the close handshake.
//! Binary frames are a protocol violation and surface as read errors.
//!
//! [`connect`] and [`accept`] wire real sockets; [`WebSocketTransport::pair`]
//! builds an in-memory pair for tests.

#![forbid(unsafe_code)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use srpc_core::Transport;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

enum WriterCommand {
    /// Send a text frame; the ack reports the sink outcome.
    Frame(String, oneshot::Sender<io::Result<()>>),
    /// Send the close handshake and stop.
    Close,
}

/// A [`Transport`] over one established WebSocket.
pub struct WebSocketTransport<S> {
    writer: mpsc::UnboundedSender<WriterCommand>,
    stream: AsyncMutex<SplitStream<WebSocketStream<S>>>,
    closed: Arc<AtomicBool>,
    close_notify: Notify,
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an established WebSocket.
    ///
    /// Spawns the writer task that owns the sink half; it stops after the
    /// close handshake or the first sink error.
    pub fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        let (writer, commands) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(write_loop(sink, commands, Arc::clone(&closed)));
        Self {
            writer,
            stream: AsyncMutex::new(stream),
            closed,
            close_notify: Notify::new(),
        }
    }
}

impl WebSocketTransport<DuplexStream> {
    /// Create a connected pair over an in-memory duplex, for tests.
    pub async fn pair() -> (Self, Self) {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        // Both handshake halves have to make progress at once.
        let (client_ws, server_ws) = tokio::join!(
            async {
                tokio_tungstenite::client_async("ws://localhost/", client_end)
                    .await
                    .expect("client handshake failed")
                    .0
            },
            async {
                tokio_tungstenite::accept_async(server_end)
                    .await
                    .expect("server handshake failed")
            }
        );
        (Self::new(client_ws), Self::new(server_ws))
    }
}

impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn send(&self, frame: String) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"));
        }
        let (ack, done) = oneshot::channel();
        self.writer
            .send(WriterCommand::Frame(frame, ack))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer task stopped"))?;
        match done.await {
            Ok(result) => result,
            // The writer hit the close command first and dropped the queue.
            Err(_) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed")),
        }
    }

    async fn recv(&self) -> io::Result<Option<String>> {
        let mut stream = self.stream.lock().await;
        loop {
            if self.is_closed() {
                return Ok(None);
            }
            tokio::select! {
                _ = self.close_notify.notified() => return Ok(None),
                next = stream.next() => match next {
                    Some(Ok(WsMessage::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                    Some(Ok(WsMessage::Close(_))) | None => {
                        self.closed.store(true, Ordering::Release);
                        // Answer the handshake (or flush the teardown) and
                        // stop the writer.
                        let _ = self.writer.send(WriterCommand::Close);
                        return Ok(None);
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {
                        continue;
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "binary frames not allowed",
                        ));
                    }
                    Some(Err(e)) => return Err(io::Error::other(e)),
                },
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.writer.send(WriterCommand::Close);
        // A recv blocked on the stream won't see our own outbound close
        // handshake; wake it directly.
        self.close_notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    closed: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Frame(frame, ack) => {
                let result = sink
                    .send(WsMessage::Text(frame.into()))
                    .await
                    .map_err(io::Error::other);
                let failed = result.is_err();
                let _ = ack.send(result);
                if failed {
                    // A dead sink stays dead; later sends fail through the
                    // dropped queue.
                    closed.store(true, Ordering::Release);
                    break;
                }
            }
            WriterCommand::Close => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
}

/// Connect to a WebSocket server.
pub async fn connect(url: &str) -> io::Result<WebSocketTransport<MaybeTlsStream<TcpStream>>> {
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(io::Error::other)?;
    Ok(WebSocketTransport::new(ws))
}

/// Accept an inbound WebSocket on an already-accepted stream.
pub async fn accept<S>(stream: S) -> io::Result<WebSocketTransport<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(io::Error::other)?;
    Ok(WebSocketTransport::new(ws))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_round_trips_text_frames() {
        let (a, b) = WebSocketTransport::pair().await;
        a.send(r#"{"x":1}"#.to_owned()).await.unwrap();
        assert_eq!(b.recv().await.unwrap().as_deref(), Some(r#"{"x":1}"#));
        b.send("pong".to_owned()).await.unwrap();
        assert_eq!(a.recv().await.unwrap().as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn close_ends_both_sides() {
        let (a, b) = WebSocketTransport::pair().await;
        a.close();
        assert!(a.is_closed());
        // The peer sees the handshake as a clean end of stream.
        assert_eq!(b.recv().await.unwrap(), None);
        assert!(b.is_closed());
        // The closing side's own recv is done as well.
        assert_eq!(a.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_recv() {
        let (a, b) = WebSocketTransport::pair().await;
        let blocked = tokio::spawn(async move { b.recv().await });
        tokio::task::yield_now().await;
        a.close();
        assert_eq!(blocked.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn send_after_close_errors() {
        let (a, _b) = WebSocketTransport::pair().await;
        a.close();
        let error = a.send("late".to_owned()).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn binary_frames_are_rejected() {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let (mut raw, ws) = tokio::join!(
            async {
                tokio_tungstenite::client_async("ws://localhost/", client_end)
                    .await
                    .expect("client handshake failed")
                    .0
            },
            async {
                tokio_tungstenite::accept_async(server_end)
                    .await
                    .expect("server handshake failed")
            }
        );
        let transport = WebSocketTransport::new(ws);

        raw.send(WsMessage::Binary(vec![1, 2, 3].into())).await.unwrap();
        let error = transport.recv().await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn connects_over_a_real_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let transport = accept(stream).await.unwrap();
            let frame = transport.recv().await.unwrap().expect("one frame");
            transport.send(frame).await.unwrap();
            // Wait for the peer's close handshake.
            assert_eq!(transport.recv().await.unwrap(), None);
        });

        let transport = connect(&format!("ws://{addr}")).await.unwrap();
        transport.send("over tcp".to_owned()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().as_deref(), Some("over tcp"));
        transport.close();
        server.await.unwrap();
    }
}

/// Conformance tests using srpc-testkit.
#[cfg(test)]
mod conformance_tests {
    use super::*;
    use srpc_testkit::{TestError, TransportFactory};

    struct WebSocketFactory;

    impl TransportFactory for WebSocketFactory {
        type Transport = WebSocketTransport<DuplexStream>;

        async fn connect_pair() -> Result<(Self::Transport, Self::Transport), TestError> {
            Ok(WebSocketTransport::pair().await)
        }
    }

    #[tokio::test]
    async fn call_round_trip() {
        srpc_testkit::run_call_round_trip::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn concurrent_calls() {
        srpc_testkit::run_concurrent_calls::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn close_rejects_new_calls() {
        srpc_testkit::run_close_rejects_new_calls::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn graceful_close_drains() {
        srpc_testkit::run_graceful_close_drains::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn reject_while_closing() {
        srpc_testkit::run_reject_while_closing::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn handler_failure_maps_to_internal_error() {
        srpc_testkit::run_handler_failure_internal_error::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn disconnect_fires_hook() {
        srpc_testkit::run_disconnect_fires_hook::<WebSocketFactory>().await;
    }
}
