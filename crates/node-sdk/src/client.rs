//! Core node client: manages the WebSocket lifecycle, pairing handshake,
//! heartbeat, and concurrent invocation dispatch into [`NodeRuntime`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use nb_protocol::{
    ErrorCode, InvocationEnvelope, NodeInfo, WsMessage, MAX_INVOKE_PAYLOAD_BYTES, PROTOCOL_VERSION,
};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::reconnect::{seed_for, ReconnectBackoff};
use crate::runtime::NodeRuntime;
use crate::state::ConnectionState;
use crate::token::TokenStore;
use crate::types::{InvokeContext, NodeSdkError};

/// A fully-configured node client ready to connect to the gateway.
///
/// Create via [`NodeClientBuilder`](crate::builder::NodeClientBuilder).
pub struct NodeClient {
    pub(crate) gateway_ws_url: String,
    pub(crate) gateway_token: Option<String>,
    pub(crate) node: NodeInfo,
    pub(crate) runtime: Arc<NodeRuntime>,
    pub(crate) token_store: Arc<dyn TokenStore>,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) hello_timeout: Duration,
    pub(crate) reconnect_backoff: ReconnectBackoff,
    pub(crate) max_concurrent_invocations: usize,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
}

/// How a single connection ended.
#[derive(Debug)]
enum SessionEnd {
    Closed { welcomed: bool },
    Rejected(String),
    Revoked,
}

impl NodeClient {
    pub fn builder() -> crate::builder::NodeClientBuilder {
        crate::builder::NodeClientBuilder::new()
    }

    /// Live connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The dispatch runtime, e.g. for toggling capability settings while
    /// connected.
    pub fn runtime(&self) -> Arc<NodeRuntime> {
        self.runtime.clone()
    }

    /// Connect, pair, and serve invocations until shutdown.
    ///
    /// Reconnects after transport failures according to the
    /// [`ReconnectBackoff`] policy.  A rejected or revoked pairing is terminal
    /// and returned as an error.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), NodeSdkError> {
        let seed = seed_for(&self.node.node_id);
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                self.set_state(ConnectionState::Disconnected);
                return Err(NodeSdkError::Shutdown);
            }
            self.set_state(ConnectionState::Connecting);

            let result = tokio::select! {
                r = self.connect_and_run() => r,
                _ = shutdown.cancelled() => {
                    tracing::info!(node_id = %self.node.node_id, "shutdown requested");
                    self.set_state(ConnectionState::Disconnected);
                    return Err(NodeSdkError::Shutdown);
                }
            };

            match result {
                Ok(SessionEnd::Closed { welcomed }) => {
                    tracing::info!(node_id = %self.node.node_id, welcomed, "connection closed");
                    if welcomed {
                        attempt = 0;
                    }
                }
                Ok(SessionEnd::Rejected(reason)) => {
                    tracing::warn!(node_id = %self.node.node_id, reason = %reason, "pairing rejected");
                    self.set_state(ConnectionState::Rejected {
                        reason: reason.clone(),
                    });
                    return Err(NodeSdkError::PairingRejected(reason));
                }
                Ok(SessionEnd::Revoked) => {
                    tracing::warn!(node_id = %self.node.node_id, "pairing revoked by gateway");
                    self.token_store.clear();
                    self.set_state(ConnectionState::Revoked);
                    return Err(NodeSdkError::PairingRevoked);
                }
                Err(e) => {
                    tracing::warn!(
                        node_id = %self.node.node_id,
                        attempt,
                        error = %e,
                        "connection lost"
                    );
                }
            }
            self.set_state(ConnectionState::Disconnected);

            if self.reconnect_backoff.should_give_up(attempt) {
                tracing::error!(node_id = %self.node.node_id, attempts = attempt, "max reconnect attempts exhausted");
                return Err(NodeSdkError::ReconnectExhausted(attempt));
            }

            let delay = self.reconnect_backoff.delay_for_attempt(attempt, seed);
            tracing::info!(
                node_id = %self.node.node_id,
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                "reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    return Err(NodeSdkError::Shutdown);
                }
            }
            attempt += 1;
        }
    }

    /// Same as [`run`](Self::run), on a spawned task.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<Result<(), NodeSdkError>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn hello(&self) -> WsMessage {
        let mut node = self.node.clone();
        node.capabilities = self.runtime.capabilities();
        node.commands = self.runtime.commands();
        WsMessage::NodeHello {
            protocol_version: PROTOCOL_VERSION,
            node,
            token: self.token_store.load(),
        }
    }

    /// Single connection lifecycle: connect, hello, pairing wait, message loop.
    async fn connect_and_run(&self) -> Result<SessionEnd, anyhow::Error> {
        let url = self.build_url();
        tracing::info!(node_id = %self.node.node_id, "connecting to gateway");

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        sink.send(Message::Text(serde_json::to_string(&self.hello())?))
            .await?;

        // ── Handshake ────────────────────────────────────────────────
        let mut pending = false;
        let session_id = loop {
            let frame = if pending {
                stream.next().await
            } else {
                tokio::time::timeout(self.hello_timeout, stream.next())
                    .await
                    .map_err(|_| anyhow::anyhow!("no reply to node_hello"))?
            };
            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    anyhow::bail!("connection closed before welcome")
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };
            match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::GatewayWelcome {
                    session_id,
                    gateway_version,
                    token,
                    ..
                }) => {
                    if let Some(token) = token {
                        self.token_store.save(&token);
                    }
                    tracing::info!(
                        node_id = %self.node.node_id,
                        gateway_version = %gateway_version,
                        session_id = %session_id,
                        "gateway welcomed us"
                    );
                    break session_id;
                }
                Ok(WsMessage::PairingPending { request_id }) => {
                    tracing::info!(
                        node_id = %self.node.node_id,
                        request_id = %request_id,
                        "waiting for pairing approval"
                    );
                    pending = true;
                    self.set_state(ConnectionState::PendingApproval { request_id });
                }
                Ok(WsMessage::PairingRejected { reason }) => {
                    return Ok(SessionEnd::Rejected(reason));
                }
                Ok(WsMessage::Ping { timestamp }) => {
                    sink.send(Message::Text(serde_json::to_string(&WsMessage::Pong { timestamp })?))
                        .await?;
                }
                Ok(other) => {
                    tracing::debug!(kind = other.kind(), "ignoring message before welcome");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "failed to parse message");
                }
            }
        };
        self.set_state(ConnectionState::Connected { session_id });

        // ── Message loop with heartbeat ──────────────────────────────
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);
        let permits = Arc::new(Semaphore::new(self.max_concurrent_invocations));
        let inflight_cancel = CancellationToken::new();

        let ping_tx = outbound_tx.clone();
        let ping_interval = self.heartbeat_interval;
        let ping_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(json) = encode(&WsMessage::Ping {
                    timestamp: Utc::now().timestamp_millis(),
                }) else {
                    continue;
                };
                if ping_tx.send(json).await.is_err() {
                    break;
                }
            }
        });

        let writer_task = tokio::spawn(async move {
            while let Some(json) = outbound_rx.recv().await {
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        let mut end = SessionEnd::Closed { welcomed: true };
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => {
                    tracing::info!("gateway closed connection");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "read error");
                    break;
                }
            };
            if text.len() > MAX_INVOKE_PAYLOAD_BYTES {
                tracing::warn!(bytes = text.len(), "inbound frame exceeds limit, dropping");
                continue;
            }

            match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::InvokeRequest {
                    id,
                    command,
                    params,
                    idempotency_key,
                    timeout_ms,
                }) => {
                    tracing::debug!(request_id = %id, command = %command, "received invoke_request");
                    let runtime = self.runtime.clone();
                    let tx = outbound_tx.clone();
                    let permits = permits.clone();
                    let cancel = inflight_cancel.child_token();

                    tokio::spawn(async move {
                        let Ok(_permit) = permits.acquire_owned().await else {
                            return;
                        };
                        let ctx = InvokeContext {
                            request_id: id.clone(),
                            command,
                            idempotency_key,
                            cancel,
                        };
                        let envelope = runtime
                            .handle_invoke(ctx, params, timeout_ms.map(Duration::from_millis))
                            .await;
                        let Some(json) = encode_result(&id, envelope) else {
                            return;
                        };
                        let _ = tx.send(json).await;
                    });
                }
                Ok(WsMessage::Ping { timestamp }) => {
                    if let Some(json) = encode(&WsMessage::Pong { timestamp }) {
                        let _ = outbound_tx.send(json).await;
                    }
                }
                Ok(WsMessage::Pong { .. }) => {
                    tracing::trace!("received pong");
                }
                Ok(WsMessage::PairingRevoked {}) => {
                    end = SessionEnd::Revoked;
                    break;
                }
                Ok(other) => {
                    tracing::debug!(kind = other.kind(), "ignoring message");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "failed to parse message");
                }
            }
        }

        inflight_cancel.cancel();
        ping_task.abort();
        writer_task.abort();

        Ok(end)
    }

    fn build_url(&self) -> String {
        let base = &self.gateway_ws_url;
        match &self.gateway_token {
            Some(token) => {
                let sep = if base.contains('?') { "&" } else { "?" };
                format!("{base}{sep}token={token}")
            }
            None => base.clone(),
        }
    }
}

fn encode(msg: &WsMessage) -> Option<String> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(error = %e, kind = msg.kind(), "failed to serialize outbound message");
            None
        }
    }
}

/// Serialize an `invoke_result`, replacing oversized results with an error so
/// the gateway never waits on a frame it would refuse.
fn encode_result(id: &str, envelope: InvocationEnvelope) -> Option<String> {
    let json = encode(&WsMessage::invoke_result(id, envelope))?;
    if json.len() <= MAX_INVOKE_PAYLOAD_BYTES {
        return Some(json);
    }
    tracing::warn!(request_id = %id, bytes = json.len(), "invoke result too large");
    encode(&WsMessage::invoke_result(
        id,
        InvocationEnvelope::failure(
            ErrorCode::Unavailable,
            format!(
                "result of {} bytes exceeds the {} byte limit",
                json.len(),
                MAX_INVOKE_PAYLOAD_BYTES
            ),
        ),
    ))
}
