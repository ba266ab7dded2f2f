//! Remote WebSocket carrier.
//!
//! Connects out to a hub URL, consumes the hub's `welcome` message, sends a
//! `register` message, then keeps the channel alive from a background task:
//! JSON `{"type":"ping"}` keepalives from the hub are answered with
//! `{"type":"pong"}`. Capability negotiation is the HTTP upgrade itself, so
//! there is no raw handshake line. Tool-invocation dispatch over this channel
//! belongs to an external collaborator.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::BridgeConfig;
use crate::probe::VerificationReport;
use crate::transport::{TransportClient, TransportState};

/// State name used by the HTTP transport.
pub const HTTP_TRANSPORT_NAME: &str = "http";

/// Name advertised in the `register` message.
const CLIENT_NAME: &str = "mcp-bridge";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Command {
    /// WebSocket ping round trip; the reply reports whether a pong arrived.
    Ping(oneshot::Sender<bool>),
}

struct RunningChannel {
    cmd_tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Remote WebSocket transport.
pub struct HttpTransportClient {
    config: BridgeConfig,
    url: String,
    state: Arc<Mutex<TransportState>>,
    running: tokio::sync::Mutex<Option<RunningChannel>>,
}

impl HttpTransportClient {
    /// Create a client targeting the configured `http_url`.
    pub fn new(config: BridgeConfig) -> Self {
        let url = config.http_url.clone();
        Self::with_url(config, url)
    }

    /// Create a client targeting an explicit `ws://` URL.
    pub fn with_url(config: BridgeConfig, url: String) -> Self {
        Self {
            config,
            url,
            state: Arc::new(Mutex::new(TransportState::Disconnected {
                transport: HTTP_TRANSPORT_NAME.to_string(),
                reason: "Not started".to_string(),
            })),
            running: tokio::sync::Mutex::new(None),
        }
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    /// Connect, consume `welcome`, send `register`.
    async fn open_channel(&self) -> Result<WsStream, String> {
        let connected =
            tokio::time::timeout(self.config.connect_timeout, connect_async(self.url.as_str()))
                .await;
        let (mut ws, _response) = match connected {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(format!("WebSocket connect failed: {e}")),
            Err(_) => return Err("Connection timeout".to_string()),
        };

        // The hub speaks first.
        let welcome = tokio::time::timeout(self.config.handshake_timeout, ws.next()).await;
        match welcome {
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(e) => return Err(format!("Malformed welcome message: {e}")),
                };
                if value.get("type").and_then(|t| t.as_str()) != Some("welcome") {
                    return Err(format!("Unexpected hub greeting: {text}"));
                }
            }
            Ok(Some(Ok(other))) => return Err(format!("Unexpected hub greeting: {other:?}")),
            Ok(Some(Err(e))) => return Err(format!("WebSocket error during welcome: {e}")),
            Ok(None) => return Err("Hub closed before welcome".to_string()),
            Err(_) => return Err("Timed out waiting for hub welcome".to_string()),
        }

        let register = json!({ "type": "register", "client": CLIENT_NAME }).to_string();
        if let Err(e) = ws.send(Message::Text(register)).await {
            return Err(format!("Failed to register with hub: {e}"));
        }

        Ok(ws)
    }

    /// Channel task: answer hub keepalives, service ping commands, record the
    /// disconnect reason when the hub goes away.
    async fn channel_loop(
        mut ws: WsStream,
        mut cmd_rx: mpsc::Receiver<Command>,
        state: Arc<Mutex<TransportState>>,
    ) {
        let mut pending_pong: Option<oneshot::Sender<bool>> = None;

        let reason = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Ping(reply)) => {
                        if ws.send(Message::Ping(Vec::new())).await.is_err() {
                            let _ = reply.send(false);
                            break "Connection closed".to_string();
                        }
                        pending_pong = Some(reply);
                    }
                    // Client dropped the handle: orderly close.
                    None => {
                        let _ = ws.close(None).await;
                        return;
                    }
                },
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        Self::handle_hub_message(&mut ws, &text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        if let Some(reply) = pending_pong.take() {
                            let _ = reply.send(true);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break "Connection closed by hub".to_string();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("WebSocket error: {e}"),
                },
            }
        };

        if let Some(reply) = pending_pong.take() {
            let _ = reply.send(false);
        }
        tracing::warn!("HTTP transport channel ended: {reason}");
        *state.lock().expect("state lock poisoned") = TransportState::Disconnected {
            transport: HTTP_TRANSPORT_NAME.to_string(),
            reason,
        };
    }

    async fn handle_hub_message(ws: &mut WsStream, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Ignoring malformed hub message: {e}");
                return;
            }
        };
        match value.get("type").and_then(|t| t.as_str()) {
            Some("ping") => {
                let pong = json!({ "type": "pong" }).to_string();
                if let Err(e) = ws.send(Message::Text(pong)).await {
                    tracing::debug!("Failed to answer hub keepalive: {e}");
                }
            }
            Some("registered") => tracing::debug!("Hub acknowledged registration"),
            other => tracing::debug!(message_type = ?other, "Ignoring hub message"),
        }
    }
}

#[async_trait]
impl TransportClient for HttpTransportClient {
    fn name(&self) -> &'static str {
        HTTP_TRANSPORT_NAME
    }

    fn state(&self) -> TransportState {
        self.state.lock().expect("state lock poisoned").clone()
    }

    async fn start(&self) -> bool {
        self.stop().await;
        self.set_state(TransportState::Connecting);

        let ws = match self.open_channel().await {
            Ok(ws) => ws,
            Err(reason) => {
                tracing::warn!(url = %self.url, "HTTP transport start failed: {reason}");
                self.set_state(TransportState::Error {
                    transport: HTTP_TRANSPORT_NAME.to_string(),
                    reason,
                });
                return false;
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(Self::channel_loop(ws, cmd_rx, self.state.clone()));

        *self.running.lock().await = Some(RunningChannel { cmd_tx, task });
        self.set_state(TransportState::Connected);
        tracing::debug!(url = %self.url, "HTTP transport connected");
        true
    }

    async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            drop(running.cmd_tx);
            if let Err(e) = running.task.await {
                tracing::warn!("Channel task ended abnormally: {e}");
            }
            self.set_state(TransportState::Disconnected {
                transport: HTTP_TRANSPORT_NAME.to_string(),
                reason: "Stopped".to_string(),
            });
            tracing::debug!(url = %self.url, "HTTP transport stopped");
        }
    }

    async fn verify(&self) -> VerificationReport {
        let cmd_tx = {
            let running = self.running.lock().await;
            match running.as_ref() {
                Some(running) if self.state().is_connected() => running.cmd_tx.clone(),
                _ => return VerificationReport::failure("Transport not started"),
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if cmd_tx.send(Command::Ping(reply_tx)).await.is_err() {
            return VerificationReport::failure("Channel task is gone");
        }

        let ponged = tokio::time::timeout(self.config.frame_timeout, reply_rx).await;
        match ponged {
            Ok(Ok(true)) => VerificationReport {
                success: true,
                message: "Bridge verified".to_string(),
                // The HTTP upgrade is the capability negotiation.
                handshake_valid: true,
                ping_succeeded: true,
            },
            Ok(Ok(false)) | Ok(Err(_)) => VerificationReport {
                success: false,
                message: "WebSocket ping failed".to_string(),
                handshake_valid: true,
                ping_succeeded: false,
            },
            Err(_) => VerificationReport {
                success: false,
                message: "WebSocket ping timed out".to_string(),
                handshake_valid: true,
                ping_succeeded: false,
            },
        }
    }
}
