//! `nb-node-sdk`: device-side runtime for the node bridge.
//!
//! A "node" is a device process (phone, tablet, desktop) that connects to the
//! gateway over WebSocket, waits for an operator to approve its pairing, and
//! then executes `canvas.*`, `camera.*` and `screen.*` commands through
//! host-supplied capability providers.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Host app (iOS / Android / macOS)                         │
//! │                                                           │
//! │   let providers = CapabilityProviders::new()              │
//! │       .with_canvas(WebView)                               │
//! │       .with_camera(Camera);                               │
//! │                                                           │
//! │   NodeClientBuilder::new()                                │
//! │       .gateway_ws_url("ws://gw:3290/v1/nodes/ws")         │
//! │       .node_id("kitchen-ipad")                            │
//! │       .settings(user_settings)                            │
//! │       .providers(providers)                               │
//! │       .token_store(keychain)                              │
//! │       .build()?                                           │
//! │       .run(shutdown)                                      │
//! │       .await;                                             │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Connection flow
//!
//! 1. Connect WS (with `token=<gateway token>` when configured)
//! 2. Send `node_hello { node, token? }` with the stored pairing credential
//! 3. Either `gateway_welcome` (paired) or `pairing_pending` followed by
//!    `gateway_welcome { token }` on approval / `pairing_rejected`
//! 4. Main loop:
//!    - On `invoke_request`: run [`NodeRuntime::handle_invoke`], always send `invoke_result`
//!    - On `ping`: reply `pong`
//!    - On `pairing_revoked`: clear the stored credential and stop
//! 5. On disconnect: reconnect with jittered exponential back-off
//!
//! # Dispatch order
//!
//! Namespace lookup, then the on-device enablement flag, then param
//! decoding, then the provider.  A disabled capability never touches the
//! provider or the filesystem.

pub mod artifact;
pub mod builder;
pub mod client;
pub mod lock;
pub mod media;
pub mod providers;
pub mod reconnect;
pub mod runtime;
pub mod settings;
pub mod state;
pub mod token;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use artifact::TempArtifact;
pub use builder::NodeClientBuilder;
pub use client::NodeClient;
pub use providers::{CameraProvider, CanvasProvider, CapabilityProviders, ClipInfo, ScreenProvider};
pub use reconnect::ReconnectBackoff;
pub use runtime::NodeRuntime;
pub use settings::CapabilitySettings;
pub use state::ConnectionState;
pub use token::{MemoryTokenStore, TokenStore};
pub use types::{InvokeContext, NodeSdkError, ProviderError};

// Re-export protocol types so nodes never need to depend on nb-protocol directly.
pub use nb_protocol::{
    CameraClipParams, CameraSnapParams, Capability, ErrorCode, ImageFormat, InvocationEnvelope,
    MediaPayload, NodeInfo, ScreenRecordParams, WsMessage, PROTOCOL_VERSION,
};
