//! WebSocket endpoint for node bridge connections.
//!
//! Flow:
//! 1. Node connects to `/v1/nodes/ws` (with `?token=<admission-token>` when
//!    the gateway has one configured)
//! 2. Node sends `node_hello` with its NodeInfo and stored pairing token
//! 3. Known node with a valid token → `gateway_welcome`.  Otherwise
//!    → `pairing_pending`, then `gateway_welcome` (with a fresh token) once
//!    an operator approves, or `pairing_rejected` on reject/expiry
//! 4. Message loop: gateway sends `invoke_request`, node answers with
//!    `invoke_result`, both exchange `ping`/`pong`

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use nb_protocol::{InvocationEnvelope, NodeInfo, WsMessage, MAX_INVOKE_PAYLOAD_BYTES, PROTOCOL_VERSION};

use crate::nodes::pairing::{PairingError, PairingEvent, PairingOutcome, PendingPairingRequest};
use crate::nodes::registry::ConnectedNode;
use crate::state::AppState;

/// Constant-time token comparison via SHA-256 digest.
/// Hashing normalizes lengths so ct_eq always compares 32 bytes.
fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query params
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Pre-shared admission token.
    pub token: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /v1/nodes/ws: upgrade to WebSocket.
///
/// When the env var named by `server.node_token_env` is set and non-empty,
/// the socket must present it as `?token=`.  Pairing approval is required
/// regardless.
pub async fn node_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let expected = std::env::var(&state.config.server.node_token_env)
        .ok()
        .filter(|t| !t.is_empty());
    if let Some(expected) = expected {
        let provided = query.token.as_deref().unwrap_or("");
        if !token_eq(provided, &expected) {
            tracing::warn!(remote = %remote, "bridge admission token rejected");
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing node token",
            )
                .into_response();
        }
    }

    ws.max_message_size(MAX_INVOKE_PAYLOAD_BYTES + 64 * 1024)
        .on_upgrade(move |socket| handle_socket(socket, state, remote.to_string()))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState, remote: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // 1. Wait for node_hello.
    let hello_timeout = Duration::from_secs(state.config.bridge.hello_timeout_secs);
    let Some(hello) = wait_for_hello(&mut ws_stream, hello_timeout).await else {
        tracing::warn!(remote = %remote, "node disconnected before sending node_hello");
        return;
    };

    if hello.protocol_version != PROTOCOL_VERSION {
        tracing::warn!(
            remote = %remote,
            version = hello.protocol_version,
            "unsupported bridge protocol version"
        );
        let reason = format!(
            "unsupported protocol version {} (gateway speaks {PROTOCOL_VERSION})",
            hello.protocol_version
        );
        reject(&mut ws_sink, reason).await;
        return;
    }
    if hello.node.node_id.trim().is_empty() {
        reject(&mut ws_sink, "nodeId is required".into()).await;
        return;
    }

    let node_id = hello.node.node_id.clone();

    // 2. Pairing.  Subscribe first so an approval cannot slip past.
    let mut events = state.pairing.subscribe();
    let outcome = state.pairing.request_pairing(
        hello.node.clone(),
        hello.token.as_deref(),
        Some(remote.clone()),
    );
    let minted = match outcome {
        Ok(PairingOutcome::Reconnected(_)) => None,
        Ok(PairingOutcome::Pending(request)) => {
            let pending = WsMessage::PairingPending {
                request_id: request.request_id.clone(),
            };
            if send_ws_message(&mut ws_sink, &pending).await.is_err() {
                return;
            }
            match await_approval(&mut ws_sink, &mut ws_stream, &mut events, &request).await {
                Approval::Approved(token) => Some(token),
                Approval::Denied(reason) => {
                    reject(&mut ws_sink, reason).await;
                    return;
                }
                Approval::Gone => {
                    tracing::debug!(node_id = %node_id, "node left while awaiting approval");
                    return;
                }
            }
        }
        Err(PairingError::LimitReached(reason)) => {
            // Not a verdict on this node: close without `pairing_rejected`
            // so the node backs off and retries once a slot frees up.
            tracing::warn!(node_id = %node_id, reason = %reason, "pairing queue full, closing");
            let _ = ws_sink.send(Message::Close(None)).await;
            return;
        }
        Err(e) => {
            tracing::warn!(node_id = %node_id, error = %e, "pairing request refused");
            reject(&mut ws_sink, e.to_string()).await;
            return;
        }
    };
    drop(events);

    // 3. Welcome, then register the session.
    let session_id = uuid::Uuid::new_v4().to_string();
    let welcome = WsMessage::GatewayWelcome {
        protocol_version: PROTOCOL_VERSION,
        gateway_version: env!("CARGO_PKG_VERSION").to_string(),
        session_id: session_id.clone(),
        token: minted,
    };
    if send_ws_message(&mut ws_sink, &welcome).await.is_err() {
        tracing::warn!(node_id = %node_id, "failed to send gateway_welcome");
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(64);
    let cancel = CancellationToken::new();
    let now = Utc::now();
    state.connections.register(ConnectedNode {
        info: hello.node,
        remote_address: Some(remote),
        session_id: session_id.clone(),
        connected_at: now,
        last_seen: now,
        sink: outbound_tx.clone(),
        cancel: cancel.clone(),
    });

    // Writer task: forwards outbound channel messages to the WS sink.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if send_ws_message(&mut ws_sink, &msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    // 4. Reader loop with gateway-side heartbeat.
    let period = Duration::from_secs(state.config.bridge.heartbeat_interval_secs.max(1));
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if !state.pairing.is_paired(&node_id) {
                    let _ = outbound_tx.send(WsMessage::PairingRevoked {}).await;
                }
                break;
            }
            _ = heartbeat.tick() => {
                let ping = WsMessage::Ping { timestamp: Utc::now().timestamp_millis() };
                let _ = outbound_tx.try_send(ping);
            }
            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<WsMessage>(&text) {
                    Ok(msg) => handle_inbound(&state, &node_id, &outbound_tx, msg),
                    Err(e) => {
                        tracing::debug!(node_id = %node_id, error = %e, "ignoring unparseable message");
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => state.connections.touch(&node_id),
                Some(Err(e)) => {
                    tracing::debug!(node_id = %node_id, error = %e, "bridge socket error");
                    break;
                }
            },
        }
    }

    // Cleanup: drop the session before failing its dispatches (the router
    // re-checks the session after tracking one), then let the writer drain.
    state.connections.remove(&node_id, &session_id);
    let failed = state.router.fail_pending_for_node(&node_id, &session_id);
    drop(outbound_tx);
    let abort = writer.abort_handle();
    if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
        abort.abort();
    }
    tracing::info!(
        node_id = %node_id,
        session_id = %session_id,
        failed_in_flight = failed,
        "bridge session closed"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Hello {
    protocol_version: u32,
    node: NodeInfo,
    token: Option<String>,
}

enum Approval {
    Approved(String),
    Denied(String),
    Gone,
}

async fn wait_for_hello(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    timeout: Duration,
) -> Option<Hello> {
    let hello = tokio::time::timeout(timeout, async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(WsMessage::NodeHello {
                    protocol_version,
                    node,
                    token,
                }) = serde_json::from_str::<WsMessage>(&text)
                {
                    return Some(Hello {
                        protocol_version,
                        node,
                        token,
                    });
                }
            }
        }
        None
    })
    .await;

    hello.unwrap_or(None)
}

/// Hold the socket in `PendingApproval` until the operator decides.
async fn await_approval(
    sink: &mut (impl SinkExt<Message> + Unpin),
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    events: &mut broadcast::Receiver<PairingEvent>,
    request: &PendingPairingRequest,
) -> Approval {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PairingEvent::Approved { request_id, token, .. })
                    if request_id == request.request_id => return Approval::Approved(token),
                Ok(PairingEvent::Rejected { request_id, .. })
                    if request_id == request.request_id => {
                    return Approval::Denied("pairing rejected by operator".into());
                }
                Ok(PairingEvent::Expired { request_id, .. })
                    if request_id == request.request_id => {
                    return Approval::Denied("pairing request expired".into());
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // The decision may have been among the missed events;
                    // closing lets the node reconnect and re-evaluate.
                    tracing::warn!(
                        node_id = %request.node_id(),
                        missed,
                        "pairing events lagged while awaiting approval"
                    );
                    return Approval::Gone;
                }
                Err(broadcast::error::RecvError::Closed) => return Approval::Gone,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(WsMessage::Ping { timestamp }) = serde_json::from_str::<WsMessage>(&text) {
                        if send_ws_message(sink, &WsMessage::Pong { timestamp }).await.is_err() {
                            return Approval::Gone;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Approval::Gone,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn reject(sink: &mut (impl SinkExt<Message> + Unpin), reason: String) {
    let _ = send_ws_message(sink, &WsMessage::PairingRejected { reason }).await;
    let _ = sink.send(Message::Close(None)).await;
}

async fn send_ws_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &WsMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

fn handle_inbound(state: &AppState, node_id: &str, outbound: &mpsc::Sender<WsMessage>, msg: WsMessage) {
    state.connections.touch(node_id);

    match msg {
        WsMessage::InvokeResult {
            id,
            ok,
            payload,
            error,
        } => {
            let envelope = InvocationEnvelope { ok, payload, error };
            state.router.complete(node_id, &id, envelope);
        }
        WsMessage::Ping { timestamp } => {
            let _ = outbound.try_send(WsMessage::Pong { timestamp });
        }
        WsMessage::Pong { .. } => {}
        other => {
            tracing::debug!(
                node_id = %node_id,
                msg_type = other.kind(),
                "unexpected inbound message type"
            );
        }
    }
}
