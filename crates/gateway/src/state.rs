use std::sync::Arc;
use std::time::Instant;

use nb_domain::config::Config;

use crate::nodes::pairing::PairingRegistry;
use crate::nodes::registry::ConnectionRegistry;
use crate::nodes::router::InvocationRouter;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub started_at: Instant,

    // ── Nodes ─────────────────────────────────────────────────────────
    /// Pending and approved nodes.
    pub pairing: Arc<PairingRegistry>,
    /// Live bridge sessions.
    pub connections: Arc<ConnectionRegistry>,
    /// `node.invoke` dispatch, dedupe and timeouts.
    pub router: Arc<InvocationRouter>,

    // ── Security ──────────────────────────────────────────────────────
    /// SHA-256 of the operator API token; `None` in dev mode.
    pub api_token_hash: Option<Vec<u8>>,
}
