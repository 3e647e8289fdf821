//! Node directory: merges paired records with live sessions for
//! `node.list` / `node.describe`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use nb_protocol::NodeInfo;
use serde::Serialize;

use super::pairing::{PairedNode, PairingRegistry};
use super::registry::{ConnectionRegistry, LiveNode};

/// One node as seen by callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEntry {
    #[serde(flatten)]
    pub info: NodeInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    pub paired: bool,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeList {
    pub ts: i64,
    pub connected_node_ids: Vec<String>,
    pub paired_node_ids: Vec<String>,
    pub nodes: Vec<NodeEntry>,
}

/// All known nodes, sorted by display name (falling back to node id),
/// case-sensitive, ties broken by node id.
pub fn list(pairing: &PairingRegistry, connections: &ConnectionRegistry) -> NodeList {
    let paired = pairing.list_paired();
    let live = connections.live_nodes();

    let paired_node_ids: Vec<String> = paired.iter().map(|p| p.node.node_id.clone()).collect();
    let mut connected_node_ids: Vec<String> = live.iter().map(|l| l.info.node_id.clone()).collect();
    connected_node_ids.sort();

    let ids: BTreeSet<&str> = paired_node_ids
        .iter()
        .chain(connected_node_ids.iter())
        .map(String::as_str)
        .collect();

    let mut nodes: Vec<NodeEntry> = ids
        .into_iter()
        .filter_map(|id| {
            merge(
                paired.iter().find(|p| p.node.node_id == id),
                live.iter().find(|l| l.info.node_id == id),
            )
        })
        .collect();
    nodes.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    NodeList {
        ts: Utc::now().timestamp_millis(),
        connected_node_ids,
        paired_node_ids,
        nodes,
    }
}

/// Full metadata for one node, or `None` when neither paired nor connected.
pub fn describe(
    pairing: &PairingRegistry,
    connections: &ConnectionRegistry,
    node_id: &str,
) -> Option<NodeEntry> {
    let paired = pairing.get_paired(node_id);
    let live = connections.live(node_id);
    merge(paired.as_ref(), live.as_ref())
}

fn merge(paired: Option<&PairedNode>, live: Option<&LiveNode>) -> Option<NodeEntry> {
    // Live metadata is what the node reported most recently.
    let info = live
        .map(|l| l.info.clone())
        .or_else(|| paired.map(|p| p.node.clone()))?;
    Some(NodeEntry {
        info,
        remote_address: live
            .and_then(|l| l.remote_address.clone())
            .or_else(|| paired.and_then(|p| p.remote_address.clone())),
        paired: paired.is_some(),
        connected: live.is_some(),
        connected_at: live.map(|l| l.connected_at),
        approved_at_ms: paired.map(|p| p.approved_at_ms),
    })
}

fn sort_key(entry: &NodeEntry) -> (&str, &str) {
    let name = entry
        .info
        .display_name
        .as_deref()
        .unwrap_or(&entry.info.node_id);
    (name, &entry.info.node_id)
}
