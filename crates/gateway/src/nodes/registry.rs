//! In-memory registry of live bridge sessions.
//!
//! Only nodes that completed the handshake (paired and welcomed) are
//! registered here.  A reconnect replaces the older session and cancels it;
//! cleanup of the old socket never removes the newer session.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use nb_protocol::{NodeInfo, WsMessage};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A message the gateway can push to a connected node's WebSocket.
pub type NodeSink = mpsc::Sender<WsMessage>;

/// A live bridge session.
pub struct ConnectedNode {
    pub info: NodeInfo,
    pub remote_address: Option<String>,
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Channel to the session's WS writer task.
    pub sink: NodeSink,
    /// Cancelled when the session is replaced, revoked or pruned.
    pub cancel: CancellationToken,
}

/// Summary returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub node_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Live snapshot of one connection, for the directory.
#[derive(Debug, Clone)]
pub struct LiveNode {
    pub info: NodeInfo,
    pub remote_address: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Thread-safe registry of all connected nodes, keyed by node id.
pub struct ConnectionRegistry {
    nodes: RwLock<HashMap<String, ConnectedNode>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session, replacing (and cancelling) any older session for
    /// the same node.
    pub fn register(&self, node: ConnectedNode) {
        let id = node.info.node_id.clone();
        tracing::info!(
            node_id = %id,
            session_id = %node.session_id,
            commands = node.info.commands.len(),
            "node connected"
        );
        if let Some(old) = self.nodes.write().insert(id.clone(), node) {
            tracing::info!(node_id = %id, session_id = %old.session_id, "replacing older session");
            old.cancel.cancel();
        }
    }

    /// Remove a session on disconnect.  No-op when a newer session owns
    /// the node id.
    pub fn remove(&self, node_id: &str, session_id: &str) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.get(node_id) {
            Some(n) if n.session_id == session_id => {
                nodes.remove(node_id);
                tracing::info!(node_id = %node_id, session_id = %session_id, "node disconnected");
                true
            }
            _ => false,
        }
    }

    /// Forcibly close a node's session (revocation).
    pub fn disconnect(&self, node_id: &str) -> bool {
        match self.nodes.write().remove(node_id) {
            Some(node) => {
                node.cancel.cancel();
                tracing::info!(node_id = %node_id, session_id = %node.session_id, "node session closed");
                true
            }
            None => false,
        }
    }

    /// Update the last_seen timestamp (called on any inbound frame).
    pub fn touch(&self, node_id: &str) {
        if let Some(node) = self.nodes.write().get_mut(node_id) {
            node.last_seen = Utc::now();
        }
    }

    pub fn is_connected(&self, node_id: &str) -> bool {
        self.nodes.read().contains_key(node_id)
    }

    /// Whether `session_id` is still the node's registered session.
    pub fn is_current(&self, node_id: &str, session_id: &str) -> bool {
        self.nodes
            .read()
            .get(node_id)
            .is_some_and(|n| n.session_id == session_id)
    }

    /// Outbound channel and session id for a node.
    pub fn sink(&self, node_id: &str) -> Option<(NodeSink, String)> {
        self.nodes
            .read()
            .get(node_id)
            .map(|n| (n.sink.clone(), n.session_id.clone()))
    }

    pub fn live(&self, node_id: &str) -> Option<LiveNode> {
        self.nodes.read().get(node_id).map(|n| LiveNode {
            info: n.info.clone(),
            remote_address: n.remote_address.clone(),
            connected_at: n.connected_at,
        })
    }

    pub fn live_nodes(&self) -> Vec<LiveNode> {
        self.nodes
            .read()
            .values()
            .map(|n| LiveNode {
                info: n.info.clone(),
                remote_address: n.remote_address.clone(),
                connected_at: n.connected_at,
            })
            .collect()
    }

    /// All sessions, by node id.
    pub fn list(&self) -> Vec<ConnectionSummary> {
        let mut out: Vec<_> = self
            .nodes
            .read()
            .values()
            .map(|n| ConnectionSummary {
                node_id: n.info.node_id.clone(),
                session_id: n.session_id.clone(),
                remote_address: n.remote_address.clone(),
                connected_at: n.connected_at,
                last_seen: n.last_seen,
            })
            .collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Drop sessions silent for longer than `max_age`.  Returns pruned ids.
    pub fn prune_stale(&self, max_age: chrono::Duration) -> Vec<String> {
        let cutoff = Utc::now() - max_age;
        let mut nodes = self.nodes.write();
        let stale: Vec<String> = nodes
            .iter()
            .filter(|(_, n)| n.last_seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            if let Some(node) = nodes.remove(id) {
                node.cancel.cancel();
                tracing::warn!(node_id = %id, last_seen = %node.last_seen, "pruned stale node");
            }
        }
        stale
    }
}
