//! Pairing registry: pending approval requests and approved nodes.
//!
//! All mutations go through one mutex, so concurrent approvals for the same
//! node serialize: the first wins and removes every pending request for that
//! node, the second sees `NotFound`.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use nb_domain::config::PairingConfig;
use nb_protocol::NodeInfo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An unapproved connection attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPairingRequest {
    pub request_id: String,
    #[serde(flatten)]
    pub node: NodeInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    /// A PairedNode record already exists for this node id.
    pub is_repair: bool,
    /// Creation time (ms since epoch).
    pub ts: i64,
}

impl PendingPairingRequest {
    pub fn node_id(&self) -> &str {
        &self.node.node_id
    }
}

/// An approved, trusted device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairedNode {
    #[serde(flatten)]
    pub node: NodeInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    pub created_at_ms: i64,
    pub approved_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected_at_ms: Option<i64>,
}

impl PairedNode {
    pub fn node_id(&self) -> &str {
        &self.node.node_id
    }
}

/// Result of an approval.  `token` is the only copy of the plaintext
/// credential; the registry keeps a hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedNode {
    #[serde(flatten)]
    pub node: PairedNode,
    pub token: String,
}

/// What happened when a node said hello.
#[derive(Debug, Clone)]
pub enum PairingOutcome {
    /// Known node proving its stored token: straight to paired.
    Reconnected(PairedNode),
    /// Waiting for an operator.
    Pending(PendingPairingRequest),
}

/// Lifecycle notifications for bridge connections waiting on approval.
#[derive(Debug, Clone)]
pub enum PairingEvent {
    Requested(PendingPairingRequest),
    Approved {
        request_id: String,
        node_id: String,
        token: String,
    },
    Rejected {
        request_id: String,
        node_id: String,
    },
    Expired {
        request_id: String,
        node_id: String,
    },
    Revoked {
        node_id: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("limit reached: {0}")]
    LimitReached(String),
    #[error("pairing store: {0}")]
    Persist(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairedRecord {
    #[serde(flatten)]
    node: PairedNode,
    token_hash: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    paired: Vec<PairedRecord>,
}

#[derive(Default)]
struct Store {
    pending: HashMap<String, PendingPairingRequest>,
    paired: HashMap<String, PairedRecord>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PairingRegistry {
    store: Mutex<Store>,
    pending_ttl_ms: i64,
    max_pending: usize,
    max_paired: usize,
    state_path: Option<PathBuf>,
    events: broadcast::Sender<PairingEvent>,
}

impl PairingRegistry {
    /// Build from config, loading persisted pairings when `state_path` is set.
    pub fn new(config: &PairingConfig) -> Result<Self, PairingError> {
        let mut store = Store::default();
        if let Some(path) = &config.state_path {
            for record in load_store(path)?.paired {
                store.paired.insert(record.node.node.node_id.clone(), record);
            }
            tracing::info!(
                path = %path.display(),
                paired = store.paired.len(),
                "loaded pairing store"
            );
        }

        let (events, _) = broadcast::channel(256);
        Ok(Self {
            store: Mutex::new(store),
            pending_ttl_ms: i64::try_from(config.pending_ttl_secs.saturating_mul(1000))
                .unwrap_or(i64::MAX),
            max_pending: config.max_pending,
            max_paired: config.max_paired,
            state_path: config.state_path.clone(),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PairingEvent> {
        self.events.subscribe()
    }

    /// Pending requests, oldest first.
    pub fn list_pending(&self) -> Vec<PendingPairingRequest> {
        let mut out: Vec<_> = self.store.lock().pending.values().cloned().collect();
        out.sort_by(|a, b| (a.ts, &a.request_id).cmp(&(b.ts, &b.request_id)));
        out
    }

    /// Paired nodes, by node id.
    pub fn list_paired(&self) -> Vec<PairedNode> {
        let mut out: Vec<_> = self
            .store
            .lock()
            .paired
            .values()
            .map(|r| r.node.clone())
            .collect();
        out.sort_by(|a, b| a.node.node_id.cmp(&b.node.node_id));
        out
    }

    pub fn is_paired(&self, node_id: &str) -> bool {
        self.store.lock().paired.contains_key(node_id)
    }

    pub fn get_paired(&self, node_id: &str) -> Option<PairedNode> {
        self.store.lock().paired.get(node_id).map(|r| r.node.clone())
    }

    pub fn verify_token(&self, node_id: &str, token: &str) -> bool {
        self.store
            .lock()
            .paired
            .get(node_id)
            .map(|r| hash_eq(&r.token_hash, &hash_token(token)))
            .unwrap_or(false)
    }

    /// Called when a node says hello.
    ///
    /// A paired node presenting a valid token reconnects (metadata refreshed,
    /// no pairing event).  Anything else gets a pending request; an existing
    /// one for the same node is reused.
    pub fn request_pairing(
        &self,
        node: NodeInfo,
        token: Option<&str>,
        remote_address: Option<String>,
    ) -> Result<PairingOutcome, PairingError> {
        let now = Utc::now().timestamp_millis();
        let mut store = self.store.lock();
        let expired = self.take_expired(&mut store, now);

        let node_id = node.node_id.clone();
        let token_ok = match (store.paired.get(&node_id), token) {
            (Some(record), Some(t)) => hash_eq(&record.token_hash, &hash_token(t)),
            _ => false,
        };

        let existing_request = store
            .pending
            .values()
            .find(|r| r.node.node_id == node_id)
            .map(|r| r.request_id.clone());

        let outcome = if token_ok {
            let Some(record) = store.paired.get_mut(&node_id) else {
                return Err(PairingError::NotFound(node_id));
            };
            record.node.node = node;
            record.node.remote_address = remote_address;
            record.node.last_connected_at_ms = Some(now);
            let paired = record.node.clone();
            self.persist(&store);
            drop(store);
            tracing::debug!(node_id = %node_id, "paired node reconnected");
            PairingOutcome::Reconnected(paired)
        } else if let Some(existing) = existing_request
            .as_deref()
            .and_then(|id| store.pending.get_mut(id))
        {
            existing.node = node;
            existing.remote_address = remote_address;
            let existing = existing.clone();
            drop(store);
            tracing::debug!(
                node_id = %node_id,
                request_id = %existing.request_id,
                "reusing pending pairing request"
            );
            PairingOutcome::Pending(existing)
        } else {
            if store.pending.len() >= self.max_pending {
                drop(store);
                self.emit_expired(expired);
                return Err(PairingError::LimitReached(format!(
                    "{} pairing requests already pending",
                    self.max_pending
                )));
            }
            let request = PendingPairingRequest {
                request_id: uuid::Uuid::new_v4().to_string(),
                is_repair: store.paired.contains_key(&node_id),
                node,
                remote_address,
                ts: now,
            };
            store
                .pending
                .insert(request.request_id.clone(), request.clone());
            drop(store);
            tracing::info!(
                node_id = %node_id,
                request_id = %request.request_id,
                is_repair = request.is_repair,
                "pairing requested"
            );
            let _ = self.events.send(PairingEvent::Requested(request.clone()));
            PairingOutcome::Pending(request)
        };

        self.emit_expired(expired);
        Ok(outcome)
    }

    /// Approve a pending request and mint a fresh credential.
    pub fn approve(&self, request_id: &str) -> Result<ApprovedNode, PairingError> {
        let now = Utc::now().timestamp_millis();
        let mut store = self.store.lock();
        let expired = self.take_expired(&mut store, now);

        let Some(request) = store.pending.get(request_id).cloned() else {
            drop(store);
            self.emit_expired(expired);
            return Err(PairingError::NotFound(format!("pairing request {request_id}")));
        };
        let node_id = request.node.node_id.clone();

        let existing = store.paired.get(&node_id).map(|r| r.node.created_at_ms);
        if existing.is_none() && store.paired.len() >= self.max_paired {
            drop(store);
            self.emit_expired(expired);
            return Err(PairingError::LimitReached(format!(
                "{} nodes already paired",
                self.max_paired
            )));
        }

        store.pending.retain(|_, r| r.node.node_id != node_id);

        let token = uuid::Uuid::new_v4().to_string();
        let paired = PairedNode {
            node: request.node,
            remote_address: request.remote_address,
            created_at_ms: existing.unwrap_or(now),
            approved_at_ms: now,
            last_connected_at_ms: None,
        };
        store.paired.insert(
            node_id.clone(),
            PairedRecord {
                node: paired.clone(),
                token_hash: hash_token(&token),
            },
        );
        self.persist(&store);
        drop(store);

        tracing::info!(node_id = %node_id, request_id = %request_id, "pairing approved");
        self.emit_expired(expired);
        let _ = self.events.send(PairingEvent::Approved {
            request_id: request_id.to_string(),
            node_id,
            token: token.clone(),
        });

        Ok(ApprovedNode {
            node: paired,
            token,
        })
    }

    pub fn reject(&self, request_id: &str) -> Result<(), PairingError> {
        let now = Utc::now().timestamp_millis();
        let mut store = self.store.lock();
        let expired = self.take_expired(&mut store, now);
        let removed = store.pending.remove(request_id);
        drop(store);
        self.emit_expired(expired);

        let request =
            removed.ok_or_else(|| PairingError::NotFound(format!("pairing request {request_id}")))?;
        tracing::info!(node_id = %request.node.node_id, request_id = %request_id, "pairing rejected");
        let _ = self.events.send(PairingEvent::Rejected {
            request_id: request.request_id,
            node_id: request.node.node_id,
        });
        Ok(())
    }

    /// Delete the PairedNode record.  The caller drops any live connection.
    pub fn revoke(&self, node_id: &str) -> Result<PairedNode, PairingError> {
        let mut store = self.store.lock();
        let record = store
            .paired
            .remove(node_id)
            .ok_or_else(|| PairingError::NotFound(format!("paired node {node_id}")))?;
        self.persist(&store);
        drop(store);

        tracing::info!(node_id = %node_id, "pairing revoked");
        let _ = self.events.send(PairingEvent::Revoked {
            node_id: node_id.to_string(),
        });
        Ok(record.node)
    }

    /// Drop pending requests older than the TTL.  Returns how many expired.
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now().timestamp_millis();
        let expired = {
            let mut store = self.store.lock();
            self.take_expired(&mut store, now)
        };
        let count = expired.len();
        self.emit_expired(expired);
        count
    }

    // ── Internals ────────────────────────────────────────────────────

    fn take_expired(&self, store: &mut Store, now: i64) -> Vec<PendingPairingRequest> {
        let ids: Vec<String> = store
            .pending
            .values()
            .filter(|r| now.saturating_sub(r.ts) >= self.pending_ttl_ms)
            .map(|r| r.request_id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| store.pending.remove(id))
            .collect()
    }

    fn emit_expired(&self, expired: Vec<PendingPairingRequest>) {
        for request in expired {
            tracing::info!(
                node_id = %request.node.node_id,
                request_id = %request.request_id,
                "pairing request expired"
            );
            let _ = self.events.send(PairingEvent::Expired {
                request_id: request.request_id,
                node_id: request.node.node_id,
            });
        }
    }

    /// Write the paired set to `state_path`.  Called with the store lock
    /// held so file order matches mutation order.
    fn persist(&self, store: &Store) {
        let Some(path) = &self.state_path else {
            return;
        };
        let mut paired: Vec<_> = store.paired.values().cloned().collect();
        paired.sort_by(|a, b| a.node.node.node_id.cmp(&b.node.node.node_id));
        if let Err(e) = save_store(path, &StoreFile { paired }) {
            tracing::error!(path = %path.display(), error = %e, "failed to persist pairing store");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence & hashing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn load_store(path: &Path) -> Result<StoreFile, PairingError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreFile::default()),
        Err(e) => return Err(PairingError::Persist(format!("reading {}: {e}", path.display()))),
    };

    match serde_json::from_str(&raw) {
        Ok(file) => Ok(file),
        Err(e) => {
            let backup = path.with_extension(format!("corrupt.{}.json", Utc::now().timestamp_millis()));
            match fs::rename(path, &backup) {
                Ok(()) => tracing::warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "pairing store unreadable, moved aside"
                ),
                Err(err) => tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "pairing store unreadable and could not be moved aside"
                ),
            }
            Ok(StoreFile::default())
        }
    }
}

fn save_store(path: &Path, file: &StoreFile) -> Result<(), PairingError> {
    let persist_err = |e: std::io::Error| PairingError::Persist(format!("{}: {e}", path.display()));
    let content =
        serde_json::to_string_pretty(file).map_err(|e| PairingError::Persist(e.to_string()))?;
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(persist_err)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(persist_err)?;
    temp.write_all(content.as_bytes())
        .and_then(|_| temp.as_file().sync_all())
        .map_err(persist_err)?;
    temp.persist(path).map_err(|e| persist_err(e.error))?;
    Ok(())
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn hash_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PairingRegistry {
        PairingRegistry::new(&PairingConfig::default()).unwrap()
    }

    fn node(id: &str) -> NodeInfo {
        NodeInfo {
            node_id: id.into(),
            display_name: Some(format!("{id} phone")),
            platform: Some("ios".into()),
            ..Default::default()
        }
    }

    fn pending(reg: &PairingRegistry, id: &str) -> PendingPairingRequest {
        match reg.request_pairing(node(id), None, None).unwrap() {
            PairingOutcome::Pending(r) => r,
            other => panic!("expected pending, got {other:?}"),
        }
    }

    #[test]
    fn approve_moves_request_to_paired() {
        let reg = registry();
        let req = pending(&reg, "n1");
        assert!(!req.is_repair);
        assert_eq!(reg.list_pending().len(), 1);

        let approved = reg.approve(&req.request_id).unwrap();
        assert_eq!(approved.node.node_id(), "n1");
        assert!(!approved.token.is_empty());
        assert!(reg.list_pending().is_empty());
        assert_eq!(reg.list_paired()[0].node_id(), "n1");
        assert!(reg.verify_token("n1", &approved.token));
        assert!(!reg.verify_token("n1", "guess"));
    }

    #[test]
    fn approve_then_reject_is_not_found() {
        let reg = registry();
        let req = pending(&reg, "n1");
        reg.approve(&req.request_id).unwrap();
        assert!(matches!(reg.reject(&req.request_id), Err(PairingError::NotFound(_))));
        assert!(matches!(reg.approve(&req.request_id), Err(PairingError::NotFound(_))));
    }

    #[test]
    fn duplicate_request_reuses_pending() {
        let reg = registry();
        let first = pending(&reg, "n1");
        let mut refreshed = node("n1");
        refreshed.version = Some("2.0".into());
        let second = match reg.request_pairing(refreshed, None, None).unwrap() {
            PairingOutcome::Pending(r) => r,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(first.request_id, second.request_id);
        assert_eq!(second.node.version.as_deref(), Some("2.0"));
        assert_eq!(reg.list_pending().len(), 1);
    }

    #[test]
    fn token_reconnect_skips_pairing_and_bad_token_is_repair() {
        let reg = registry();
        let mut events = reg.subscribe();
        let req = pending(&reg, "n1");
        let token = reg.approve(&req.request_id).unwrap().token;
        while events.try_recv().is_ok() {}

        match reg.request_pairing(node("n1"), Some(&token), Some("10.0.0.5:5000".into())).unwrap() {
            PairingOutcome::Reconnected(p) => {
                assert_eq!(p.remote_address.as_deref(), Some("10.0.0.5:5000"));
                assert!(p.last_connected_at_ms.is_some());
            }
            other => panic!("expected reconnect, got {other:?}"),
        }
        assert!(events.try_recv().is_err());

        match reg.request_pairing(node("n1"), Some("stale"), None).unwrap() {
            PairingOutcome::Pending(r) => assert!(r.is_repair),
            other => panic!("expected repair, got {other:?}"),
        }
        assert!(reg.is_paired("n1"));
    }

    #[test]
    fn repair_keeps_created_at() {
        let reg = registry();
        let first = reg.approve(&pending(&reg, "n1").request_id).unwrap();
        let repair = match reg.request_pairing(node("n1"), None, None).unwrap() {
            PairingOutcome::Pending(r) => r,
            other => panic!("unexpected {other:?}"),
        };
        let second = reg.approve(&repair.request_id).unwrap();
        assert_eq!(second.node.created_at_ms, first.node.created_at_ms);
        assert_ne!(second.token, first.token);
        assert!(!reg.verify_token("n1", &first.token));
    }

    #[test]
    fn revoke_removes_record() {
        let reg = registry();
        let mut events = reg.subscribe();
        reg.approve(&pending(&reg, "n1").request_id).unwrap();
        reg.revoke("n1").unwrap();
        assert!(!reg.is_paired("n1"));
        assert!(matches!(reg.revoke("n1"), Err(PairingError::NotFound(_))));

        let mut saw_revoked = false;
        while let Ok(ev) = events.try_recv() {
            saw_revoked |= matches!(ev, PairingEvent::Revoked { ref node_id } if node_id == "n1");
        }
        assert!(saw_revoked);
    }

    #[test]
    fn expired_requests_are_pruned() {
        let reg = PairingRegistry::new(&PairingConfig {
            pending_ttl_secs: 0,
            ..Default::default()
        })
        .unwrap();
        let mut events = reg.subscribe();
        let req = pending(&reg, "n1");
        assert_eq!(reg.prune_expired(), 1);
        assert!(matches!(reg.approve(&req.request_id), Err(PairingError::NotFound(_))));

        let mut saw_expired = false;
        while let Ok(ev) = events.try_recv() {
            saw_expired |= matches!(ev, PairingEvent::Expired { .. });
        }
        assert!(saw_expired);
    }

    #[test]
    fn pending_limit() {
        let reg = PairingRegistry::new(&PairingConfig {
            max_pending: 2,
            ..Default::default()
        })
        .unwrap();
        pending(&reg, "a");
        pending(&reg, "b");
        assert!(matches!(
            reg.request_pairing(node("c"), None, None),
            Err(PairingError::LimitReached(_))
        ));
        // Re-requests for an already pending node still succeed.
        pending(&reg, "a");
    }

    #[test]
    fn paired_limit() {
        let reg = PairingRegistry::new(&PairingConfig {
            max_paired: 1,
            ..Default::default()
        })
        .unwrap();
        reg.approve(&pending(&reg, "a").request_id).unwrap();
        let b = pending(&reg, "b");
        assert!(matches!(reg.approve(&b.request_id), Err(PairingError::LimitReached(_))));
        assert_eq!(reg.list_pending().len(), 1);
    }

    #[test]
    fn concurrent_approvals_for_one_node_single_winner() {
        let reg = std::sync::Arc::new(registry());
        let req = pending(&reg, "n1");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                let id = req.request_id.clone();
                std::thread::spawn(move || reg.approve(&id).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn persists_and_reloads_paired_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/pairing.json");
        let config = PairingConfig {
            state_path: Some(path.clone()),
            ..Default::default()
        };

        let token = {
            let reg = PairingRegistry::new(&config).unwrap();
            reg.approve(&pending(&reg, "n1").request_id).unwrap().token
        };
        assert!(path.exists());
        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains(&token));

        let reg = PairingRegistry::new(&config).unwrap();
        assert!(reg.is_paired("n1"));
        assert!(reg.verify_token("n1", &token));
        assert!(reg.list_pending().is_empty());
    }

    #[test]
    fn concurrent_approvals_all_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = PairingConfig {
            state_path: Some(dir.path().join("pairing.json")),
            ..Default::default()
        };

        for round in 0..5 {
            let reg = std::sync::Arc::new(PairingRegistry::new(&config).unwrap());
            let requests: Vec<_> = (0..16)
                .map(|i| pending(&reg, &format!("r{round}-n{i}")))
                .collect();
            let handles: Vec<_> = requests
                .into_iter()
                .map(|req| {
                    let reg = reg.clone();
                    std::thread::spawn(move || reg.approve(&req.request_id).unwrap().token)
                })
                .collect();
            let tokens: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let in_memory = reg.list_paired();
            drop(reg);

            let reloaded = PairingRegistry::new(&config).unwrap();
            assert_eq!(reloaded.list_paired(), in_memory, "round {round}");
            for (i, token) in tokens.iter().enumerate() {
                assert!(reloaded.verify_token(&format!("r{round}-n{i}"), token));
            }
        }
        // Only the store itself: no stray temp files, nothing moved aside.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn revoke_after_approve_stays_revoked_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = PairingConfig {
            state_path: Some(dir.path().join("pairing.json")),
            ..Default::default()
        };
        {
            let reg = PairingRegistry::new(&config).unwrap();
            reg.approve(&pending(&reg, "n1").request_id).unwrap();
            reg.approve(&pending(&reg, "n2").request_id).unwrap();
            reg.revoke("n1").unwrap();
        }
        let reg = PairingRegistry::new(&config).unwrap();
        assert!(!reg.is_paired("n1"));
        assert!(reg.is_paired("n2"));
    }

    #[test]
    fn corrupt_store_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairing.json");
        fs::write(&path, "{ not json").unwrap();

        let reg = PairingRegistry::new(&PairingConfig {
            state_path: Some(path.clone()),
            ..Default::default()
        })
        .unwrap();
        assert!(reg.list_paired().is_empty());
        assert!(!path.exists());
        let backups = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn pending_request_wire_shape() {
        let reg = registry();
        let req = pending(&reg, "n1");
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["nodeId"], "n1");
        assert_eq!(v["isRepair"], false);
        assert!(v["requestId"].is_string());
        assert!(v["ts"].is_i64());
    }
}
