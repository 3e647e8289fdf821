//! Node bridge protocol: WebSocket message types, node metadata, the typed
//! command set, and the invocation result envelope.
//!
//! Nodes are device runtimes (phone, tablet, desktop) that pair with the
//! gateway and execute commands such as `camera.snap` or `canvas.evalJS` on
//! its behalf.

pub mod command;
pub mod envelope;
pub mod payload;

pub use command::{
    canonical_command, clamp_quality, A2uiPushParams, CameraClipParams, CameraFacing, CameraSnapParams,
    Capability, CanvasEvalParams, CanvasNavigateParams, CanvasShowParams, CommandError,
    ImageFormat, NodeCommand, ScreenRecordParams, SnapshotParams, TimeoutClass, ALL_COMMANDS,
};
pub use envelope::{ErrorCode, InvocationEnvelope, InvokeError};
pub use payload::{CommandPayload, EvalPayload, MediaPayload};

use serde::{Deserialize, Serialize};

/// Wire protocol version.  Bumped on incompatible message changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest `invoke_result` frame either side accepts (media is base64-inlined).
pub const MAX_INVOKE_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Descriptive metadata a node reports about itself in `node_hello`.
///
/// Everything except `node_id` is advisory and refreshed on each reconnect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Stable identifier, unique per device install.
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// e.g. `"ios"`, `"android"`, `"macos"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// e.g. `"iPhone"`, `"iPad"`, `"Mac"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_family: Option<String>,
    /// e.g. `"iPhone15,2"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_identifier: Option<String>,
    /// Capability tags (`"canvas"`, `"camera"`, `"screen"`).
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Command names the node can execute.
    #[serde(default)]
    pub commands: Vec<String>,
}

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// Node → Gateway: first frame on every connection.
    #[serde(rename = "node_hello")]
    NodeHello {
        protocol_version: u32,
        node: NodeInfo,
        /// Credential minted by a previous pairing approval.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Gateway → Node: the connection is waiting for operator approval.
    #[serde(rename = "pairing_pending")]
    PairingPending { request_id: String },

    /// Gateway → Node: the node is paired and may receive invocations.
    #[serde(rename = "gateway_welcome")]
    GatewayWelcome {
        protocol_version: u32,
        gateway_version: String,
        session_id: String,
        /// Present only when an approval just minted a new credential.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Gateway → Node: pairing rejected or expired.  The gateway closes next.
    #[serde(rename = "pairing_rejected")]
    PairingRejected { reason: String },

    /// Gateway → Node: the pairing was revoked.  Stored credentials are void.
    #[serde(rename = "pairing_revoked")]
    PairingRevoked {},

    /// Gateway → Node: execute a command.
    #[serde(rename = "invoke_request")]
    InvokeRequest {
        /// Correlation id, echoed in `invoke_result`.
        id: String,
        command: String,
        #[serde(default)]
        params: serde_json::Value,
        idempotency_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },

    /// Node → Gateway: command outcome.
    #[serde(rename = "invoke_result")]
    InvokeResult {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<InvokeError>,
    },

    /// Bidirectional: heartbeat.
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    /// Bidirectional: heartbeat response.
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

impl WsMessage {
    /// Wrap an envelope as the `invoke_result` for correlation id `id`.
    pub fn invoke_result(id: impl Into<String>, envelope: InvocationEnvelope) -> Self {
        WsMessage::InvokeResult {
            id: id.into(),
            ok: envelope.ok,
            payload: envelope.payload,
            error: envelope.error,
        }
    }

    /// The frame's `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            WsMessage::NodeHello { .. } => "node_hello",
            WsMessage::PairingPending { .. } => "pairing_pending",
            WsMessage::GatewayWelcome { .. } => "gateway_welcome",
            WsMessage::PairingRejected { .. } => "pairing_rejected",
            WsMessage::PairingRevoked {} => "pairing_revoked",
            WsMessage::InvokeRequest { .. } => "invoke_request",
            WsMessage::InvokeResult { .. } => "invoke_result",
            WsMessage::Ping { .. } => "ping",
            WsMessage::Pong { .. } => "pong",
        }
    }
}
