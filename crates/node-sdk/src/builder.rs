//! Builder pattern for constructing a [`NodeClient`].

use std::sync::Arc;
use std::time::Duration;

use nb_protocol::NodeInfo;

use crate::client::NodeClient;
use crate::providers::CapabilityProviders;
use crate::reconnect::ReconnectBackoff;
use crate::runtime::NodeRuntime;
use crate::settings::CapabilitySettings;
use crate::state;
use crate::token::{MemoryTokenStore, TokenStore};
use crate::types::NodeSdkError;

/// Fluent builder for [`NodeClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use nb_node_sdk::{CapabilityProviders, CapabilitySettings, NodeClientBuilder};
/// let client = NodeClientBuilder::new()
///     .gateway_ws_url("ws://localhost:3290/v1/nodes/ws")
///     .node_id("kitchen-ipad")
///     .display_name("Kitchen iPad")
///     .platform("ios")
///     .settings(CapabilitySettings::default())
///     .providers(CapabilityProviders::new())
///     .build()
///     .unwrap();
/// ```
pub struct NodeClientBuilder {
    gateway_ws_url: String,
    gateway_token: Option<String>,
    node: NodeInfo,
    settings: CapabilitySettings,
    providers: CapabilityProviders,
    token_store: Option<Arc<dyn TokenStore>>,
    heartbeat_interval: Duration,
    hello_timeout: Duration,
    reconnect_backoff: ReconnectBackoff,
    max_concurrent_invocations: usize,
}

impl NodeClientBuilder {
    pub fn new() -> Self {
        Self {
            gateway_ws_url: "ws://localhost:3290/v1/nodes/ws".into(),
            gateway_token: None,
            node: NodeInfo {
                node_id: String::new(),
                version: Some(env!("CARGO_PKG_VERSION").into()),
                ..Default::default()
            },
            settings: CapabilitySettings::default(),
            providers: CapabilityProviders::new(),
            token_store: None,
            heartbeat_interval: Duration::from_secs(30),
            hello_timeout: Duration::from_secs(10),
            reconnect_backoff: ReconnectBackoff::default(),
            max_concurrent_invocations: 8,
        }
    }

    // ── Connection ───────────────────────────────────────────────────

    /// Gateway bridge endpoint (e.g. `wss://gw.example.com/v1/nodes/ws`).
    pub fn gateway_ws_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_ws_url = url.into();
        self
    }

    /// Shared connect token, sent as `?token=` when the gateway requires one.
    /// Unrelated to the per-node pairing credential.
    pub fn gateway_token(mut self, token: impl Into<String>) -> Self {
        self.gateway_token = Some(token.into());
        self
    }

    /// Where the pairing credential is loaded from and saved to.
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    // ── Identity / metadata ──────────────────────────────────────────

    /// Set all identity fields at once.  `capabilities`/`commands` are
    /// ignored; they are derived from the registered providers.
    pub fn node_info(mut self, info: NodeInfo) -> Self {
        self.node = info;
        self
    }

    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node.node_id = id.into();
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.node.display_name = Some(name.into());
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.node.platform = Some(platform.into());
        self
    }

    pub fn version(mut self, v: impl Into<String>) -> Self {
        self.node.version = Some(v.into());
        self
    }

    pub fn device_family(mut self, family: impl Into<String>) -> Self {
        self.node.device_family = Some(family.into());
        self
    }

    pub fn model_identifier(mut self, model: impl Into<String>) -> Self {
        self.node.model_identifier = Some(model.into());
        self
    }

    // ── Capabilities ─────────────────────────────────────────────────

    pub fn settings(mut self, settings: CapabilitySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn providers(mut self, providers: CapabilityProviders) -> Self {
        self.providers = providers;
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Override the heartbeat interval (default 30s).
    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    /// How long to wait for the gateway's first reply to `node_hello`
    /// (default 10s).  Not applied while pairing is pending.
    pub fn hello_timeout(mut self, d: Duration) -> Self {
        self.hello_timeout = d;
        self
    }

    pub fn reconnect_backoff(mut self, cfg: ReconnectBackoff) -> Self {
        self.reconnect_backoff = cfg;
        self
    }

    /// Maximum invocations executing at once (default 8).
    pub fn max_concurrent_invocations(mut self, n: usize) -> Self {
        self.max_concurrent_invocations = n;
        self
    }

    pub fn build(self) -> Result<NodeClient, NodeSdkError> {
        if !(self.gateway_ws_url.starts_with("ws://") || self.gateway_ws_url.starts_with("wss://")) {
            return Err(NodeSdkError::Config(format!(
                "gateway_ws_url must be a ws:// or wss:// URL, got {:?}",
                self.gateway_ws_url
            )));
        }
        if self.node.node_id.trim().is_empty() {
            return Err(NodeSdkError::Config("node_id is required".into()));
        }
        if self.max_concurrent_invocations == 0 {
            return Err(NodeSdkError::Config(
                "max_concurrent_invocations must be at least 1".into(),
            ));
        }

        let (state_tx, _) = state::channel();
        Ok(NodeClient {
            gateway_ws_url: self.gateway_ws_url,
            gateway_token: self.gateway_token,
            node: self.node,
            runtime: Arc::new(NodeRuntime::new(self.settings, self.providers)),
            token_store: self
                .token_store
                .unwrap_or_else(|| Arc::new(MemoryTokenStore::new())),
            heartbeat_interval: self.heartbeat_interval,
            hello_timeout: self.hello_timeout,
            reconnect_backoff: self.reconnect_backoff,
            max_concurrent_invocations: self.max_concurrent_invocations,
            state_tx,
        })
    }
}

impl Default for NodeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_node_id() {
        let err = NodeClientBuilder::new().build().err().unwrap();
        assert!(matches!(err, NodeSdkError::Config(ref m) if m.contains("node_id")));
    }

    #[test]
    fn rejects_http_url() {
        let err = NodeClientBuilder::new()
            .gateway_ws_url("http://localhost:3290")
            .node_id("n1")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, NodeSdkError::Config(_)));
    }
}
