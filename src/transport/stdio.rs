//! Local socket bridge: a loopback TCP listener speaking the framed protocol.
//!
//! The client binds a listener on the allocated port and reports `Connected`
//! once it is accepting. Each accepted session gets the greeting line, then a
//! framed request loop: `ping` payloads are answered with `pong` in-loop,
//! everything else goes to the injected [`PayloadDispatcher`]. One physical
//! session is cheap, so concurrent sessions are simply spawned.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::probe::{self, VerificationReport, PING_PAYLOAD};
use crate::protocol::{framing, handshake};
use crate::transport::{NullDispatcher, PayloadDispatcher, TransportClient, TransportState};

/// State name used by the stdio transport.
pub const STDIO_TRANSPORT_NAME: &str = "stdio";

struct RunningListener {
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// Local socket bridge transport.
pub struct StdioTransportClient {
    config: BridgeConfig,
    port: u16,
    dispatcher: Arc<dyn PayloadDispatcher>,
    state: Arc<Mutex<TransportState>>,
    running: tokio::sync::Mutex<Option<RunningListener>>,
}

impl StdioTransportClient {
    /// Create a client that will listen on `port` with no tool catalog wired
    /// in (non-ping requests get a protocol-error reply).
    pub fn new(config: BridgeConfig, port: u16) -> Self {
        Self::with_dispatcher(config, port, Arc::new(NullDispatcher))
    }

    /// Create a client with an application payload dispatcher.
    pub fn with_dispatcher(
        config: BridgeConfig,
        port: u16,
        dispatcher: Arc<dyn PayloadDispatcher>,
    ) -> Self {
        Self {
            config,
            port,
            dispatcher,
            state: Arc::new(Mutex::new(TransportState::Disconnected {
                transport: STDIO_TRANSPORT_NAME.to_string(),
                reason: "Not started".to_string(),
            })),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// The port this client listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.port)
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    async fn accept_loop(
        listener: TcpListener,
        dispatcher: Arc<dyn PayloadDispatcher>,
        frame_timeout: Duration,
        state: Arc<Mutex<TransportState>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "Accepted bridge session");
                            let dispatcher = dispatcher.clone();
                            let session_shutdown = shutdown_rx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::serve_session(
                                    stream,
                                    dispatcher,
                                    frame_timeout,
                                    session_shutdown,
                                )
                                .await
                                {
                                    tracing::debug!(%peer, "Session ended: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!("Accept failed: {e}");
                            Self::mark_accept_failure(&state, &e);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// The accept loop died out from under the client; `state()` must stop
    /// reporting `Connected`.
    fn mark_accept_failure(state: &Mutex<TransportState>, e: &std::io::Error) {
        *state.lock().expect("state lock poisoned") = TransportState::Error {
            transport: STDIO_TRANSPORT_NAME.to_string(),
            reason: format!("Accept failed: {e}"),
        };
    }

    /// One session: greeting, then framed request loop until the peer closes,
    /// a fatal protocol error occurs, or shutdown is signalled.
    async fn serve_session(
        mut stream: TcpStream,
        dispatcher: Arc<dyn PayloadDispatcher>,
        frame_timeout: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> crate::error::Result<()> {
        handshake::write_greeting(&mut stream).await?;

        loop {
            // Waiting for the next request is unbounded but cancellable;
            // mid-frame reads run under the frame deadline.
            let len = tokio::select! {
                _ = shutdown_rx.changed() => return Ok(()),
                len = framing::read_frame_len(&mut stream) => match len {
                    Ok(len) => len,
                    Err(BridgeError::ConnectionClosed) => return Ok(()),
                    Err(e) => return Err(e),
                },
            };

            let payload = framing::read_payload(&mut stream, len, frame_timeout).await?;

            let response = if payload.as_ref() == PING_PAYLOAD {
                Bytes::from_static(b"pong")
            } else {
                match dispatcher.dispatch(payload).await {
                    Ok(response) => response,
                    Err(e) => {
                        // Dispatch failures are replies, never session teardown.
                        tracing::warn!("Dispatch failed: {e}");
                        Bytes::from(e.to_string())
                    }
                }
            };

            framing::write_frame(&mut stream, &response, frame_timeout).await?;
        }
    }
}

#[async_trait]
impl TransportClient for StdioTransportClient {
    fn name(&self) -> &'static str {
        STDIO_TRANSPORT_NAME
    }

    fn state(&self) -> TransportState {
        self.state.lock().expect("state lock poisoned").clone()
    }

    async fn start(&self) -> bool {
        self.stop().await;
        self.set_state(TransportState::Connecting);

        let listener = match TcpListener::bind(self.addr()).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!(port = self.port, "Failed to bind bridge listener: {e}");
                self.set_state(TransportState::Error {
                    transport: STDIO_TRANSPORT_NAME.to_string(),
                    reason: format!("Failed to bind port {}: {e}", self.port),
                });
                return false;
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            self.dispatcher.clone(),
            self.config.frame_timeout,
            self.state.clone(),
            shutdown_rx,
        ));

        *self.running.lock().await = Some(RunningListener {
            shutdown_tx,
            accept_task,
        });
        self.set_state(TransportState::Connected);
        tracing::debug!(port = self.port, "Stdio bridge listening");
        true
    }

    async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            let _ = running.shutdown_tx.send(true);
            if let Err(e) = running.accept_task.await {
                tracing::warn!("Accept loop ended abnormally: {e}");
            }
            self.set_state(TransportState::Disconnected {
                transport: STDIO_TRANSPORT_NAME.to_string(),
                reason: "Stopped".to_string(),
            });
            tracing::debug!(port = self.port, "Stdio bridge stopped");
        }
    }

    async fn verify(&self) -> VerificationReport {
        if !self.state().is_connected() {
            return VerificationReport::failure("Transport not started");
        }
        probe::verify_endpoint(&self.addr(), &self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use tokio::io::AsyncWriteExt;

    async fn started_client() -> StdioTransportClient {
        // Port 0: the OS assigns one, read back via the bound listener.
        // Tests pick real ports through the allocator; here the client is
        // constructed directly, so grab a free port first.
        let probe_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe_listener.local_addr().unwrap().port();
        drop(probe_listener);

        let client = StdioTransportClient::new(BridgeConfig::default(), port);
        assert!(client.start().await);
        client
    }

    #[tokio::test]
    async fn test_start_verify_stop() {
        let client = started_client().await;
        assert!(client.state().is_connected());

        let report = client.verify().await;
        assert!(report.success, "{}", report.message);
        assert!(report.handshake_valid);
        assert!(report.ping_succeeded);

        client.stop().await;
        assert!(!client.state().is_connected());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let client = StdioTransportClient::new(BridgeConfig::default(), 0);
        client.stop().await;
        client.stop().await;
        assert!(!client.state().is_connected());
    }

    #[tokio::test]
    async fn test_verify_before_start_fails_fast() {
        let client = StdioTransportClient::new(BridgeConfig::default(), 0);
        let report = client.verify().await;
        assert!(!report.success);
        assert_eq!(report.message, "Transport not started");
    }

    #[tokio::test]
    async fn test_start_on_contended_port_returns_false() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let client = StdioTransportClient::new(BridgeConfig::default(), port);
        assert!(!client.start().await);
        assert!(matches!(client.state(), TransportState::Error { .. }));
    }

    #[tokio::test]
    async fn test_session_dispatches_non_ping_payloads() {
        struct Echo;

        #[async_trait]
        impl PayloadDispatcher for Echo {
            async fn dispatch(&self, payload: Bytes) -> Result<Bytes> {
                let mut out = b"echo:".to_vec();
                out.extend_from_slice(&payload);
                Ok(Bytes::from(out))
            }
        }

        let probe_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe_listener.local_addr().unwrap().port();
        drop(probe_listener);

        let client =
            StdioTransportClient::with_dispatcher(BridgeConfig::default(), port, Arc::new(Echo));
        assert!(client.start().await);

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let t = Duration::from_secs(1);
        let line = handshake::read_handshake_line(&mut stream, t, 512)
            .await
            .unwrap();
        assert!(handshake::is_framing_capable(&line));

        framing::write_frame(&mut stream, b"hello", t).await.unwrap();
        let resp = framing::read_frame(&mut stream, t).await.unwrap();
        assert_eq!(&resp[..], b"echo:hello");

        // Ping is intercepted before the dispatcher.
        framing::write_frame(&mut stream, b"ping", t).await.unwrap();
        let resp = framing::read_frame(&mut stream, t).await.unwrap();
        assert_eq!(&resp[..], b"pong");

        client.stop().await;
    }

    #[tokio::test]
    async fn test_dispatch_error_becomes_reply_not_teardown() {
        let probe_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe_listener.local_addr().unwrap().port();
        drop(probe_listener);

        let client = StdioTransportClient::new(BridgeConfig::default(), port);
        assert!(client.start().await);

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let t = Duration::from_secs(1);
        let _ = handshake::read_handshake_line(&mut stream, t, 512)
            .await
            .unwrap();

        framing::write_frame(&mut stream, b"not-a-ping", t)
            .await
            .unwrap();
        let resp = framing::read_frame(&mut stream, t).await.unwrap();
        assert!(String::from_utf8_lossy(&resp).contains("No payload dispatcher"));

        // Session survives: a ping still works on the same connection.
        framing::write_frame(&mut stream, b"ping", t).await.unwrap();
        let resp = framing::read_frame(&mut stream, t).await.unwrap();
        assert_eq!(&resp[..], b"pong");

        client.stop().await;
    }

    #[test]
    fn test_accept_failure_is_reflected_in_state() {
        let state = Arc::new(Mutex::new(TransportState::Connected));
        let err = std::io::Error::new(std::io::ErrorKind::Other, "too many open files");

        StdioTransportClient::mark_accept_failure(&state, &err);

        match &*state.lock().unwrap() {
            TransportState::Error { transport, reason } => {
                assert_eq!(transport, "stdio");
                assert!(reason.contains("too many open files"));
            }
            other => panic!("unexpected state: {other:?}"),
        };
    }

    #[tokio::test]
    async fn test_zero_length_frame_ends_session() {
        let client = started_client().await;
        let port = client.port();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let t = Duration::from_secs(1);
        let _ = handshake::read_handshake_line(&mut stream, t, 512)
            .await
            .unwrap();

        stream.write_all(&0u64.to_be_bytes()).await.unwrap();

        // The server treats the zero length as fatal and closes the session.
        let err = framing::read_frame(&mut stream, t).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionClosed));

        client.stop().await;
    }

    #[tokio::test]
    async fn test_restart_reuses_port() {
        let client = started_client().await;
        let port = client.port();

        client.stop().await;
        assert!(client.start().await, "port {port} should be free after stop");
        assert!(client.verify().await.success);
        client.stop().await;
    }
}
