use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pairing registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pairing registry limits and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Seconds a pending pairing request survives without a decision.
    /// Expiry is equivalent to a rejection.
    #[serde(default = "d_pending_ttl")]
    pub pending_ttl_secs: u64,
    /// Maximum outstanding pending requests.
    #[serde(default = "d_max_pending")]
    pub max_pending: usize,
    /// Maximum paired nodes.
    #[serde(default = "d_max_paired")]
    pub max_paired: usize,
    /// JSON file holding paired nodes across restarts.  `None` keeps the
    /// registry in memory only.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: d_pending_ttl(),
            max_pending: d_max_pending(),
            max_paired: d_max_paired(),
            state_path: None,
        }
    }
}

fn d_pending_ttl() -> u64 {
    600
}
fn d_max_pending() -> usize {
    50
}
fn d_max_paired() -> usize {
    500
}
