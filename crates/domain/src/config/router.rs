use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timeouts, dedupe retention and backpressure for `node.invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Default timeout for interactive commands (`canvas.*` except snapshot).
    #[serde(default = "d_interactive")]
    pub interactive_timeout_ms: u64,
    /// Default timeout for media capture (`camera.*`, `screen.record`,
    /// `canvas.snapshot`).
    #[serde(default = "d_media")]
    pub media_timeout_ms: u64,
    /// Caller-supplied timeouts are clamped to this ceiling.
    #[serde(default = "d_max_timeout")]
    pub max_timeout_ms: u64,
    /// How long a completed envelope is replayed for a repeated
    /// `(node_id, command, idempotency_key)`.
    #[serde(default = "d_retention")]
    pub result_retention_secs: u64,
    /// In-flight dispatches allowed per node (0 = unlimited).
    #[serde(default = "d_max_pending_per_node")]
    pub max_pending_per_node: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            interactive_timeout_ms: d_interactive(),
            media_timeout_ms: d_media(),
            max_timeout_ms: d_max_timeout(),
            result_retention_secs: d_retention(),
            max_pending_per_node: d_max_pending_per_node(),
        }
    }
}

fn d_interactive() -> u64 {
    15_000
}
fn d_media() -> u64 {
    120_000
}
fn d_max_timeout() -> u64 {
    600_000
}
fn d_retention() -> u64 {
    60
}
fn d_max_pending_per_node() -> usize {
    32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactive_default_shorter_than_media() {
        let cfg = RouterConfig::default();
        assert!(cfg.interactive_timeout_ms < cfg.media_timeout_ms);
        assert_eq!(cfg.result_retention_secs, 60);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: RouterConfig = toml::from_str("interactive_timeout_ms = 5000").unwrap();
        assert_eq!(cfg.interactive_timeout_ms, 5000);
        assert_eq!(cfg.media_timeout_ms, 120_000);
        assert_eq!(cfg.max_pending_per_node, 32);
    }
}
