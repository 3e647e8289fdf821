use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Environment variable holding an optional pre-shared bridge admission
    /// token.  When the variable is set and non-empty, nodes must present it
    /// as `?token=` on the bridge socket before pairing even starts.  Pairing
    /// approval is required either way.
    #[serde(default = "d_node_token_env")]
    pub node_token_env: String,
    /// Environment variable holding the operator API bearer token.  Unset or
    /// empty leaves the RPC/REST surface open (dev mode).
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    /// Upper bound on concurrently served HTTP requests.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            node_token_env: d_node_token_env(),
            api_token_env: d_api_token_env(),
            max_concurrent_requests: d_max_concurrent(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    3290
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_node_token_env() -> String {
    "NB_NODE_TOKEN".into()
}
fn d_api_token_env() -> String {
    "NB_API_TOKEN".into()
}
fn d_max_concurrent() -> usize {
    256
}
