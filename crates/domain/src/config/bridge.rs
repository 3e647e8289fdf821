use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bridge transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Seconds a fresh socket has to send `node_hello`.
    #[serde(default = "d_hello_timeout")]
    pub hello_timeout_secs: u64,
    /// Interval of gateway-initiated `ping` frames.
    #[serde(default = "d_heartbeat")]
    pub heartbeat_interval_secs: u64,
    /// Connected nodes silent for longer than this are dropped.
    #[serde(default = "d_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hello_timeout_secs: d_hello_timeout(),
            heartbeat_interval_secs: d_heartbeat(),
            stale_after_secs: d_stale_after(),
        }
    }
}

fn d_hello_timeout() -> u64 {
    10
}
fn d_heartbeat() -> u64 {
    30
}
fn d_stale_after() -> u64 {
    90
}
