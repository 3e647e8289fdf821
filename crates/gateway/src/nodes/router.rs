//! Invocation router: dispatches `node.invoke` to a paired, connected node
//! over its bridge session and waits for the correlated `invoke_result`.
//!
//! Every path returns an [`InvocationEnvelope`]; failures are encoded as
//! `{ok:false, error}` at the point they are detected.
//!
//! Dedupe: invocations are keyed by `(node_id, command, idempotency_key)`,
//! with command aliases resolved.
//! While one is in flight, repeat callers attach to its result.  Once it
//! completes, the envelope is replayed for `result_retention_secs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nb_domain::config::RouterConfig;
use nb_protocol::{canonical_command, ErrorCode, InvocationEnvelope, TimeoutClass, WsMessage};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{oneshot, watch};

use super::pairing::PairingRegistry;
use super::registry::ConnectionRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One `node.invoke` call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub node_id: String,
    pub command: String,
    #[serde(default)]
    pub params: Value,
    pub idempotency_key: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

type DedupeKey = (String, String, String);

enum Slot {
    InFlight {
        node_id: String,
        rx: watch::Receiver<Option<InvocationEnvelope>>,
    },
    Done {
        envelope: InvocationEnvelope,
        at: Instant,
    },
}

struct PendingDispatch {
    node_id: String,
    session_id: String,
    tx: oneshot::Sender<InvocationEnvelope>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// InvocationRouter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct InvocationRouter {
    pairing: Arc<PairingRegistry>,
    connections: Arc<ConnectionRegistry>,
    config: RouterConfig,
    /// Dedupe table: in-flight watchers and retained results.
    slots: Mutex<HashMap<DedupeKey, Slot>>,
    /// Correlation id → waiting dispatch task.
    pending: Mutex<HashMap<String, PendingDispatch>>,
}

impl InvocationRouter {
    pub fn new(
        pairing: Arc<PairingRegistry>,
        connections: Arc<ConnectionRegistry>,
        config: RouterConfig,
    ) -> Self {
        Self {
            pairing,
            connections,
            config,
            slots: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Invoke a command on a node.  Never fails; errors are in the envelope.
    pub async fn invoke(self: &Arc<Self>, req: InvokeRequest) -> InvocationEnvelope {
        if let Some(envelope) = validate(&req) {
            return envelope;
        }

        let key: DedupeKey = (
            req.node_id.clone(),
            canonical_command(&req.command).to_string(),
            req.idempotency_key.clone(),
        );

        let mut rx = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(Slot::Done { envelope, at }) if at.elapsed() < self.retention() => {
                    tracing::debug!(
                        node_id = %req.node_id,
                        command = %req.command,
                        idempotency_key = %req.idempotency_key,
                        "replaying retained result"
                    );
                    return envelope.clone();
                }
                Some(Slot::InFlight { rx, .. }) => {
                    tracing::debug!(
                        node_id = %req.node_id,
                        command = %req.command,
                        idempotency_key = %req.idempotency_key,
                        "attaching to in-flight invocation"
                    );
                    rx.clone()
                }
                _ => {
                    if let Some(envelope) = self.check_routable(&req.node_id, &slots) {
                        return envelope;
                    }
                    let (tx, rx) = watch::channel(None);
                    slots.insert(
                        key.clone(),
                        Slot::InFlight {
                            node_id: req.node_id.clone(),
                            rx: rx.clone(),
                        },
                    );
                    let router = Arc::clone(self);
                    tokio::spawn(async move { router.dispatch(key, req, tx).await });
                    rx
                }
            }
        };

        let result = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(|| {
            InvocationEnvelope::failure(ErrorCode::Unavailable, "dispatch ended without a result")
        })
    }

    /// Deliver an `invoke_result` from a node.  Returns false when the
    /// correlation id is unknown (late, duplicate, or from another node);
    /// such results are discarded.
    pub fn complete(&self, node_id: &str, correlation_id: &str, envelope: InvocationEnvelope) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(correlation_id) {
            Some(p) if p.node_id == node_id => {}
            Some(_) => {
                tracing::warn!(
                    node_id = %node_id,
                    request_id = %correlation_id,
                    "invoke_result from a node that does not own the request"
                );
                return false;
            }
            None => {
                tracing::warn!(
                    node_id = %node_id,
                    request_id = %correlation_id,
                    "discarding late or unknown invoke_result"
                );
                return false;
            }
        }
        match pending.remove(correlation_id) {
            Some(p) => {
                let _ = p.tx.send(envelope);
                true
            }
            None => false,
        }
    }

    /// Fail every in-flight dispatch sent over one session with `NodeOffline`.
    pub fn fail_pending_for_node(&self, node_id: &str, session_id: &str) -> usize {
        let mut pending = self.pending.lock();
        let ids: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.node_id == node_id && p.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(p) = pending.remove(id) {
                let _ = p.tx.send(InvocationEnvelope::failure(
                    ErrorCode::NodeOffline,
                    format!("node {node_id} disconnected before responding"),
                ));
            }
        }
        if !ids.is_empty() {
            tracing::warn!(node_id = %node_id, count = ids.len(), "failed in-flight invocations");
        }
        ids.len()
    }

    /// Dispatches awaiting a node response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop retained results older than the retention window.
    pub fn prune_completed(&self) -> usize {
        let retention = self.retention();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Done { at, .. } => at.elapsed() < retention,
            Slot::InFlight { .. } => true,
        });
        before - slots.len()
    }

    /// Effective timeout: caller value clamped to the ceiling, `None`/0 use
    /// the command family default.
    pub fn effective_timeout(&self, command: &str, timeout_ms: Option<u64>) -> Duration {
        let ms = match timeout_ms {
            Some(ms) if ms > 0 => ms.min(self.config.max_timeout_ms),
            _ => match TimeoutClass::for_command(command) {
                TimeoutClass::Interactive => self.config.interactive_timeout_ms,
                TimeoutClass::Media => self.config.media_timeout_ms,
            },
        };
        Duration::from_millis(ms)
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Register a dispatch against `session_id`, then confirm the session is
    /// still live.  Session cleanup removes the connection before failing
    /// pending dispatches, so a dispatch either sees the removal here or is
    /// failed by that cleanup.
    fn track_dispatch(
        &self,
        node_id: &str,
        session_id: &str,
        correlation_id: &str,
        tx: oneshot::Sender<InvocationEnvelope>,
    ) -> bool {
        self.pending.lock().insert(
            correlation_id.to_string(),
            PendingDispatch {
                node_id: node_id.to_string(),
                session_id: session_id.to_string(),
                tx,
            },
        );
        if self.connections.is_current(node_id, session_id) {
            return true;
        }
        self.pending.lock().remove(correlation_id);
        tracing::debug!(
            node_id = %node_id,
            session_id = %session_id,
            request_id = %correlation_id,
            "session closed before dispatch"
        );
        false
    }

    fn retention(&self) -> Duration {
        Duration::from_secs(self.config.result_retention_secs)
    }

    fn check_routable(
        &self,
        node_id: &str,
        slots: &HashMap<DedupeKey, Slot>,
    ) -> Option<InvocationEnvelope> {
        if !self.pairing.is_paired(node_id) {
            return Some(InvocationEnvelope::failure(
                ErrorCode::NotPaired,
                format!("node {node_id} is not paired"),
            ));
        }
        if !self.connections.is_connected(node_id) {
            return Some(InvocationEnvelope::failure(
                ErrorCode::NodeOffline,
                format!("node {node_id} is not connected"),
            ));
        }
        if self.config.max_pending_per_node > 0 {
            let in_flight = slots
                .values()
                .filter(|s| matches!(s, Slot::InFlight { node_id: n, .. } if n == node_id))
                .count();
            if in_flight >= self.config.max_pending_per_node {
                return Some(InvocationEnvelope::failure(
                    ErrorCode::Busy,
                    format!("{in_flight} invocations already in flight for node {node_id}"),
                ));
            }
        }
        None
    }

    async fn dispatch(
        self: Arc<Self>,
        key: DedupeKey,
        req: InvokeRequest,
        tx: watch::Sender<Option<InvocationEnvelope>>,
    ) {
        let (envelope, retain) = self.send_and_wait(req).await;
        {
            let mut slots = self.slots.lock();
            if retain {
                slots.insert(
                    key,
                    Slot::Done {
                        envelope: envelope.clone(),
                        at: Instant::now(),
                    },
                );
            } else {
                slots.remove(&key);
            }
        }
        let _ = tx.send(Some(envelope));
    }

    /// Returns the envelope and whether it reflects a dispatched request
    /// (and so belongs in the retention cache).
    async fn send_and_wait(&self, req: InvokeRequest) -> (InvocationEnvelope, bool) {
        let Some((sink, session_id)) = self.connections.sink(&req.node_id) else {
            return (
                InvocationEnvelope::failure(
                    ErrorCode::NodeOffline,
                    format!("node {} is not connected", req.node_id),
                ),
                false,
            );
        };

        let timeout = self.effective_timeout(&req.command, req.timeout_ms);
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        if !self.track_dispatch(&req.node_id, &session_id, &correlation_id, tx) {
            return (
                InvocationEnvelope::failure(
                    ErrorCode::NodeOffline,
                    format!("node {} disconnected", req.node_id),
                ),
                false,
            );
        }

        let msg = WsMessage::InvokeRequest {
            id: correlation_id.clone(),
            command: req.command.clone(),
            params: req.params,
            idempotency_key: req.idempotency_key,
            timeout_ms: u64::try_from(timeout.as_millis()).ok(),
        };
        if sink.send(msg).await.is_err() {
            self.pending.lock().remove(&correlation_id);
            return (
                InvocationEnvelope::failure(
                    ErrorCode::NodeOffline,
                    format!("node {} disconnected", req.node_id),
                ),
                false,
            );
        }

        tracing::debug!(
            node_id = %req.node_id,
            command = %req.command,
            request_id = %correlation_id,
            timeout_ms = timeout.as_millis() as u64,
            "invocation dispatched"
        );
        let started = Instant::now();

        let envelope = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(_)) => InvocationEnvelope::failure(
                ErrorCode::NodeOffline,
                format!("node {} disconnected before responding", req.node_id),
            ),
            Err(_) => {
                self.pending.lock().remove(&correlation_id);
                tracing::warn!(
                    node_id = %req.node_id,
                    command = %req.command,
                    request_id = %correlation_id,
                    "invocation timed out"
                );
                InvocationEnvelope::failure(
                    ErrorCode::Timeout,
                    format!("no response within {}ms; outcome unknown", timeout.as_millis()),
                )
            }
        };

        tracing::info!(
            node_id = %req.node_id,
            command = %req.command,
            request_id = %correlation_id,
            ok = envelope.ok,
            code = envelope.error_code().map(|c| c.as_str()).unwrap_or("-"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "invocation completed"
        );
        (envelope, true)
    }
}

fn validate(req: &InvokeRequest) -> Option<InvocationEnvelope> {
    let missing = if req.node_id.trim().is_empty() {
        "nodeId"
    } else if req.command.trim().is_empty() {
        "command"
    } else if req.idempotency_key.trim().is_empty() {
        "idempotencyKey"
    } else {
        return None;
    };
    Some(InvocationEnvelope::failure(
        ErrorCode::InvalidRequest,
        format!("{missing} is required"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::pairing::PairingOutcome;
    use crate::nodes::registry::tests::session;
    use nb_domain::config::PairingConfig;
    use nb_protocol::NodeInfo;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct Fixture {
        router: Arc<InvocationRouter>,
        pairing: Arc<PairingRegistry>,
        connections: Arc<ConnectionRegistry>,
    }

    fn fixture(config: RouterConfig) -> Fixture {
        let pairing = Arc::new(PairingRegistry::new(&PairingConfig::default()).unwrap());
        let connections = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(InvocationRouter::new(
            pairing.clone(),
            connections.clone(),
            config,
        ));
        Fixture {
            router,
            pairing,
            connections,
        }
    }

    fn pair(pairing: &PairingRegistry, node_id: &str) {
        let info = NodeInfo {
            node_id: node_id.into(),
            ..Default::default()
        };
        match pairing.request_pairing(info, None, None).unwrap() {
            PairingOutcome::Pending(r) => {
                pairing.approve(&r.request_id).unwrap();
            }
            PairingOutcome::Reconnected(_) => unreachable!(),
        }
    }

    fn connect(f: &Fixture, node_id: &str, session_id: &str) -> mpsc::Receiver<WsMessage> {
        pair(&f.pairing, node_id);
        let (node, rx) = session(node_id, session_id);
        f.connections.register(node);
        rx
    }

    fn request(node_id: &str, key: &str) -> InvokeRequest {
        InvokeRequest {
            node_id: node_id.into(),
            command: "canvas.evalJS".into(),
            params: json!({"javaScript": "1+1"}),
            idempotency_key: key.into(),
            timeout_ms: None,
        }
    }

    /// Answer every invoke_request with `{"result": "<n>"}` where n counts
    /// executions.
    fn spawn_fake_node(
        router: Arc<InvocationRouter>,
        node_id: &'static str,
        mut rx: mpsc::Receiver<WsMessage>,
        delay: Duration,
    ) -> Arc<AtomicUsize> {
        let executions = Arc::new(AtomicUsize::new(0));
        let counter = executions.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let WsMessage::InvokeRequest { id, .. } = msg {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    let router = router.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        router.complete(
                            node_id,
                            &id,
                            InvocationEnvelope::success(json!({"result": n.to_string()})),
                        );
                    });
                }
            }
        });
        executions
    }

    #[tokio::test]
    async fn missing_fields_are_invalid() {
        let f = fixture(RouterConfig::default());
        let mut req = request("n1", "k");
        req.idempotency_key = String::new();
        let env = f.router.invoke(req).await;
        assert_eq!(env.error_code(), Some(ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn unpaired_node_is_not_paired() {
        let f = fixture(RouterConfig::default());
        let env = f.router.invoke(request("ghost", "k")).await;
        assert_eq!(env.error_code(), Some(ErrorCode::NotPaired));
    }

    #[tokio::test]
    async fn paired_but_disconnected_is_offline_and_not_cached() {
        let f = fixture(RouterConfig::default());
        pair(&f.pairing, "n1");
        let env = f.router.invoke(request("n1", "k")).await;
        assert_eq!(env.error_code(), Some(ErrorCode::NodeOffline));

        // Connect and retry with the same key: dispatched for real.
        let (node, rx) = session("n1", "s1");
        f.connections.register(node);
        let executions = spawn_fake_node(f.router.clone(), "n1", rx, Duration::ZERO);
        let env = f.router.invoke(request("n1", "k")).await;
        assert!(env.ok);
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicates_execute_once() {
        let f = fixture(RouterConfig::default());
        let rx = connect(&f, "n1", "s1");
        let executions = spawn_fake_node(f.router.clone(), "n1", rx, Duration::from_millis(50));

        let calls: Vec<_> = (0..5)
            .map(|_| {
                let router = f.router.clone();
                tokio::spawn(async move { router.invoke(request("n1", "same")).await })
            })
            .collect();
        let mut envelopes = Vec::new();
        for call in calls {
            envelopes.push(call.await.unwrap());
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(envelopes.iter().all(|e| e == &envelopes[0]));
        assert!(envelopes[0].ok);

        // Completed result is replayed within the retention window.
        let replay = f.router.invoke(request("n1", "same")).await;
        assert_eq!(replay, envelopes[0]);
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        // A different key executes again.
        let other = f.router.invoke(request("n1", "other")).await;
        assert!(other.ok);
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn command_alias_shares_the_idempotency_slot() {
        let f = fixture(RouterConfig::default());
        let rx = connect(&f, "n1", "s1");
        let executions = spawn_fake_node(f.router.clone(), "n1", rx, Duration::from_millis(10));

        let first = f.router.invoke(request("n1", "same")).await;
        let mut aliased = request("n1", "same");
        aliased.command = "canvas.eval".into();
        let second = f.router.invoke(aliased).await;

        assert!(first.ok);
        assert_eq!(second, first);
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_then_late_response_is_discarded() {
        let f = fixture(RouterConfig::default());
        let mut rx = connect(&f, "n1", "s1");

        let mut req = request("n1", "slow");
        req.timeout_ms = Some(100);
        let started = Instant::now();
        let env = f.router.invoke(req).await;
        assert_eq!(env.error_code(), Some(ErrorCode::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));

        let correlation_id = match rx.recv().await {
            Some(WsMessage::InvokeRequest { id, timeout_ms, .. }) => {
                assert_eq!(timeout_ms, Some(100));
                id
            }
            other => panic!("expected invoke_request, got {other:?}"),
        };
        assert!(!f.router.complete(
            "n1",
            &correlation_id,
            InvocationEnvelope::success(json!({"late": true}))
        ));
        assert_eq!(f.router.pending_count(), 0);

        // The retained outcome stays Timeout.
        let mut retry = request("n1", "slow");
        retry.timeout_ms = Some(100);
        assert_eq!(f.router.invoke(retry).await.error_code(), Some(ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn disconnect_mid_flight_is_node_offline() {
        let f = fixture(RouterConfig::default());
        let mut rx = connect(&f, "n1", "s1");

        let router = f.router.clone();
        let call = tokio::spawn(async move { router.invoke(request("n1", "k")).await });
        assert!(matches!(rx.recv().await, Some(WsMessage::InvokeRequest { .. })));

        // Another session's cleanup does not touch this dispatch.
        assert_eq!(f.router.fail_pending_for_node("n1", "s0"), 0);
        assert_eq!(f.router.fail_pending_for_node("n1", "s1"), 1);
        let env = call.await.unwrap();
        assert_eq!(env.error_code(), Some(ErrorCode::NodeOffline));
    }

    #[test]
    fn dispatch_racing_session_close_is_not_stranded() {
        let f = fixture(RouterConfig::default());
        let _rx = connect(&f, "n1", "s1");

        let (tx, _rx_live) = oneshot::channel();
        assert!(f.router.track_dispatch("n1", "s1", "c1", tx));
        assert_eq!(f.router.pending_count(), 1);
        f.router.pending.lock().clear();

        // Sink fetched for s1, then the session closes before the dispatch
        // is tracked: cleanup found nothing, so tracking must refuse.
        assert!(f.connections.remove("n1", "s1"));
        assert_eq!(f.router.fail_pending_for_node("n1", "s1"), 0);
        let (tx, rx) = oneshot::channel();
        assert!(!f.router.track_dispatch("n1", "s1", "c2", tx));
        assert_eq!(f.router.pending_count(), 0);
        assert!(rx.blocking_recv().is_err());

        // A replacement session is not the one the sink belonged to.
        let (node, _rx2) = session("n1", "s2");
        f.connections.register(node);
        let (tx, _rx3) = oneshot::channel();
        assert!(!f.router.track_dispatch("n1", "s1", "c3", tx));
        assert_eq!(f.router.pending_count(), 0);
    }

    #[tokio::test]
    async fn result_from_wrong_node_is_ignored() {
        let f = fixture(RouterConfig::default());
        let mut rx = connect(&f, "n1", "s1");

        let mut req = request("n1", "k");
        req.timeout_ms = Some(200);
        let router = f.router.clone();
        let call = tokio::spawn(async move { router.invoke(req).await });
        let id = match rx.recv().await {
            Some(WsMessage::InvokeRequest { id, .. }) => id,
            other => panic!("unexpected {other:?}"),
        };
        assert!(!f.router.complete("intruder", &id, InvocationEnvelope::empty()));
        assert!(f.router.complete("n1", &id, InvocationEnvelope::empty()));
        assert!(call.await.unwrap().ok);
    }

    #[tokio::test]
    async fn per_node_cap_returns_busy() {
        let f = fixture(RouterConfig {
            max_pending_per_node: 1,
            ..Default::default()
        });
        let mut rx = connect(&f, "n1", "s1");

        let router = f.router.clone();
        let first = tokio::spawn(async move { router.invoke(request("n1", "a")).await });
        let id = match rx.recv().await {
            Some(WsMessage::InvokeRequest { id, .. }) => id,
            other => panic!("unexpected {other:?}"),
        };

        let busy = f.router.invoke(request("n1", "b")).await;
        assert_eq!(busy.error_code(), Some(ErrorCode::Busy));

        f.router.complete("n1", &id, InvocationEnvelope::empty());
        assert!(first.await.unwrap().ok);
    }

    #[tokio::test]
    async fn retention_expires() {
        let f = fixture(RouterConfig {
            result_retention_secs: 0,
            ..Default::default()
        });
        let rx = connect(&f, "n1", "s1");
        let executions = spawn_fake_node(f.router.clone(), "n1", rx, Duration::ZERO);

        f.router.invoke(request("n1", "k")).await;
        f.router.invoke(request("n1", "k")).await;
        assert_eq!(executions.load(Ordering::SeqCst), 2);
        assert_eq!(f.router.prune_completed(), 1);
    }

    #[test]
    fn timeout_defaults_and_clamp() {
        let f = fixture(RouterConfig::default());
        let r = &f.router;
        assert_eq!(r.effective_timeout("canvas.evalJS", None), Duration::from_millis(15_000));
        assert_eq!(r.effective_timeout("camera.snap", Some(0)), Duration::from_millis(120_000));
        assert_eq!(r.effective_timeout("camera.snap", Some(250)), Duration::from_millis(250));
        assert_eq!(
            r.effective_timeout("screen.record", Some(10_000_000)),
            Duration::from_millis(600_000)
        );
    }
}
