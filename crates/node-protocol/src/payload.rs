//! Result payload shapes.
//!
//! Binary media is never carried raw: it is base64 text tagged with an
//! explicit `format`.

use serde::{Deserialize, Serialize};

/// Image or video result (`camera.snap`, `camera.clip`, `screen.record`,
/// `canvas.snapshot`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    /// `"jpg"`, `"png"` or `"mp4"`.
    pub format: String,
    pub base64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_audio: Option<bool>,
}

/// `canvas.evalJS` result: the script's value, stringified by the webview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalPayload {
    pub result: String,
}

/// Known payload shapes, with an opaque fallback for commands added later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandPayload {
    Media(MediaPayload),
    Eval(EvalPayload),
    Opaque(serde_json::Value),
}
