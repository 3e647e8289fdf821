//! Reference node for nodebridge.
//!
//! Pairs with the gateway and serves the `canvas.*` commands from a headless
//! canvas (no webview): navigation state is tracked, `location.href` and
//! `document.title` evaluate, and snapshots are blank frames.  Camera and
//! screen providers are not registered.
//!
//! Usage:
//!   nb-demo-node ws://localhost:3290/v1/nodes/ws
//!
//! Env vars:
//!   NB_NODE_TOKEN    bridge admission token (when the gateway sets one)
//!   NB_NODE_ID       node ID (default: "demo-node")
//!   NB_TOKEN_FILE    where the pairing credential is kept
//!                      (default: ".nb-demo-node.token")

mod canvas;
mod token_file;

use std::sync::Arc;

use nb_node_sdk::{CapabilityProviders, CapabilitySettings, ConnectionState, NodeClientBuilder, NodeSdkError};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::canvas::HeadlessCanvas;
use crate::token_file::FileTokenStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let gateway_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:3290/v1/nodes/ws".into());
    let node_id = std::env::var("NB_NODE_ID").unwrap_or_else(|_| "demo-node".into());
    let token_file =
        std::env::var("NB_TOKEN_FILE").unwrap_or_else(|_| ".nb-demo-node.token".into());

    let mut builder = NodeClientBuilder::new()
        .gateway_ws_url(&gateway_url)
        .node_id(&node_id)
        .display_name("Demo Node")
        .platform(std::env::consts::OS)
        .version(env!("CARGO_PKG_VERSION"))
        .settings(CapabilitySettings::default())
        .providers(CapabilityProviders::new().with_canvas(HeadlessCanvas::default()))
        .token_store(Arc::new(FileTokenStore::new(&token_file)));
    if let Some(token) = std::env::var("NB_NODE_TOKEN").ok().filter(|t| !t.is_empty()) {
        builder = builder.gateway_token(token);
    }
    let client = builder.build()?;

    tracing::info!(url = %gateway_url, node_id = %node_id, "starting demo node");

    // Log every state transition.
    let mut state = client.state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            match &*state.borrow_and_update() {
                ConnectionState::PendingApproval { request_id } => tracing::info!(
                    request_id = %request_id,
                    "waiting for operator approval (node.pair.approve)"
                ),
                other => tracing::info!(state = ?other, "connection state"),
            }
        }
    });

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received SIGINT, shutting down");
        }
        ctrl_c.cancel();
    });

    match client.run(shutdown).await {
        Ok(()) | Err(NodeSdkError::Shutdown) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
