//! The closed command set.
//!
//! Command names travel as strings on the wire; [`NodeCommand::parse`] turns a
//! `(name, params)` pair into a typed value before anything executes, so an
//! unknown name or malformed params never reaches a device provider.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ━━━ Names ━━━

pub const CANVAS_SHOW: &str = "canvas.show";
pub const CANVAS_HIDE: &str = "canvas.hide";
pub const CANVAS_NAVIGATE: &str = "canvas.navigate";
pub const CANVAS_EVAL_JS: &str = "canvas.evalJS";
pub const CANVAS_SNAPSHOT: &str = "canvas.snapshot";
pub const CANVAS_A2UI_RESET: &str = "canvas.a2ui.reset";
pub const CANVAS_A2UI_PUSH: &str = "canvas.a2ui.push";
pub const CANVAS_A2UI_PUSH_JSONL: &str = "canvas.a2ui.pushJSONL";
pub const CAMERA_SNAP: &str = "camera.snap";
pub const CAMERA_CLIP: &str = "camera.clip";
pub const SCREEN_RECORD: &str = "screen.record";

/// Legacy spelling of `canvas.evalJS`.
const CANVAS_EVAL_ALIAS: &str = "canvas.eval";

pub const ALL_COMMANDS: &[&str] = &[
    CANVAS_SHOW,
    CANVAS_HIDE,
    CANVAS_NAVIGATE,
    CANVAS_EVAL_JS,
    CANVAS_SNAPSHOT,
    CANVAS_A2UI_RESET,
    CANVAS_A2UI_PUSH,
    CANVAS_A2UI_PUSH_JSONL,
    CAMERA_SNAP,
    CAMERA_CLIP,
    SCREEN_RECORD,
];

/// Resolve aliases to the canonical command name.  Unknown names pass
/// through unchanged.
pub fn canonical_command(command: &str) -> &str {
    match command {
        CANVAS_EVAL_ALIAS => CANVAS_EVAL_JS,
        other => other,
    }
}

// ━━━ Capabilities ━━━

/// Device capability a command belongs to.  Gated by device settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Canvas,
    Camera,
    Screen,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Canvas => "canvas",
            Capability::Camera => "camera",
            Capability::Screen => "screen",
        }
    }

    /// Capability owning `command`, by namespace prefix.
    pub fn for_command(command: &str) -> Option<Capability> {
        let (ns, _) = command.split_once('.')?;
        match ns {
            "canvas" => Some(Capability::Canvas),
            "camera" => Some(Capability::Camera),
            "screen" => Some(Capability::Screen),
            _ => None,
        }
    }

    /// Commands a node advertises when this capability is enabled.
    pub fn commands(self) -> &'static [&'static str] {
        match self {
            Capability::Canvas => &[
                CANVAS_SHOW,
                CANVAS_HIDE,
                CANVAS_NAVIGATE,
                CANVAS_EVAL_JS,
                CANVAS_SNAPSHOT,
                CANVAS_A2UI_RESET,
                CANVAS_A2UI_PUSH,
                CANVAS_A2UI_PUSH_JSONL,
            ],
            Capability::Camera => &[CAMERA_SNAP, CAMERA_CLIP],
            Capability::Screen => &[SCREEN_RECORD],
        }
    }
}

/// Which default timeout applies when the caller gives none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Interactive,
    /// Capture/encode commands that legitimately run for seconds.
    Media,
}

impl TimeoutClass {
    pub fn for_command(command: &str) -> TimeoutClass {
        match command {
            CAMERA_SNAP | CAMERA_CLIP | SCREEN_RECORD | CANVAS_SNAPSHOT => TimeoutClass::Media,
            _ => TimeoutClass::Interactive,
        }
    }
}

// ━━━ Params ━━━

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Value of the payload `format` field.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasShowParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasNavigateParams {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasEvalParams {
    #[serde(alias = "script")]
    pub java_script: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotParams {
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
}

/// A2UI messages, already split into individual JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2uiPushParams {
    pub messages: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct A2uiPushJsonlParams {
    jsonl: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSnapParams {
    #[serde(default)]
    pub facing: CameraFacing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraClipParams {
    #[serde(default)]
    pub facing: CameraFacing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_audio: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenRecordParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_audio: Option<bool>,
}

const MIN_CLIP_MS: u64 = 250;
const MAX_CLIP_MS: u64 = 60_000;
const DEFAULT_QUALITY: f64 = 0.9;

/// Clamp an encoder quality into `[0.05, 1.0]`; missing or NaN means 0.9.
pub fn clamp_quality(quality: Option<f64>) -> f64 {
    match quality {
        Some(q) if !q.is_nan() => q.clamp(0.05, 1.0),
        _ => DEFAULT_QUALITY,
    }
}

impl SnapshotParams {
    pub fn quality(&self) -> f64 {
        clamp_quality(self.quality)
    }
}

impl CameraSnapParams {
    pub fn quality(&self) -> f64 {
        clamp_quality(self.quality)
    }
}

impl CameraClipParams {
    /// Requested duration, clamped into `[250, 60000]` ms (default 3000).
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms.unwrap_or(3_000).clamp(MIN_CLIP_MS, MAX_CLIP_MS)
    }

    pub fn include_audio(&self) -> bool {
        self.include_audio.unwrap_or(true)
    }
}

impl ScreenRecordParams {
    /// Requested duration, clamped into `[250, 60000]` ms (default 10000).
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms.unwrap_or(10_000).clamp(MIN_CLIP_MS, MAX_CLIP_MS)
    }

    /// Frame rate clamped into `[1, 60]` (default 10).
    pub fn fps(&self) -> f64 {
        match self.fps {
            Some(f) if !f.is_nan() => f.clamp(1.0, 60.0),
            _ => 10.0,
        }
    }

    pub fn include_audio(&self) -> bool {
        self.include_audio.unwrap_or(false)
    }
}

// ━━━ Parsing ━━━

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid params for {command}: {message}")]
    InvalidParams { command: String, message: String },
}

/// A validated command ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCommand {
    CanvasShow(CanvasShowParams),
    CanvasHide,
    CanvasNavigate(CanvasNavigateParams),
    CanvasEvalJs(CanvasEvalParams),
    CanvasSnapshot(SnapshotParams),
    CanvasA2uiReset,
    CanvasA2uiPush(A2uiPushParams),
    CanvasA2uiPushJsonl(A2uiPushParams),
    CameraSnap(CameraSnapParams),
    CameraClip(CameraClipParams),
    ScreenRecord(ScreenRecordParams),
}

impl NodeCommand {
    /// Validate a wire `(command, params)` pair.  `null` params count as `{}`.
    pub fn parse(command: &str, params: serde_json::Value) -> Result<Self, CommandError> {
        let cmd = match canonical_command(command) {
            CANVAS_SHOW => NodeCommand::CanvasShow(decode(command, params)?),
            CANVAS_HIDE => NodeCommand::CanvasHide,
            CANVAS_NAVIGATE => {
                let p: CanvasNavigateParams = decode(command, params)?;
                if p.url.trim().is_empty() {
                    return Err(invalid(command, "url must not be empty"));
                }
                NodeCommand::CanvasNavigate(p)
            }
            CANVAS_EVAL_JS => {
                let p: CanvasEvalParams = decode(CANVAS_EVAL_JS, params)?;
                if p.java_script.trim().is_empty() {
                    return Err(invalid(CANVAS_EVAL_JS, "javaScript must not be empty"));
                }
                NodeCommand::CanvasEvalJs(p)
            }
            CANVAS_SNAPSHOT => NodeCommand::CanvasSnapshot(decode(command, params)?),
            CANVAS_A2UI_RESET => NodeCommand::CanvasA2uiReset,
            CANVAS_A2UI_PUSH => {
                let p: A2uiPushParams = decode(command, params)?;
                if p.messages.is_empty() {
                    return Err(invalid(command, "messages must not be empty"));
                }
                NodeCommand::CanvasA2uiPush(p)
            }
            CANVAS_A2UI_PUSH_JSONL => {
                let p: A2uiPushJsonlParams = decode(command, params)?;
                let messages = parse_jsonl(&p.jsonl).map_err(|m| invalid(command, &m))?;
                if messages.is_empty() {
                    return Err(invalid(command, "jsonl contains no messages"));
                }
                NodeCommand::CanvasA2uiPushJsonl(A2uiPushParams { messages })
            }
            CAMERA_SNAP => NodeCommand::CameraSnap(decode(command, params)?),
            CAMERA_CLIP => NodeCommand::CameraClip(decode(command, params)?),
            SCREEN_RECORD => NodeCommand::ScreenRecord(decode(command, params)?),
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };
        Ok(cmd)
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeCommand::CanvasShow(_) => CANVAS_SHOW,
            NodeCommand::CanvasHide => CANVAS_HIDE,
            NodeCommand::CanvasNavigate(_) => CANVAS_NAVIGATE,
            NodeCommand::CanvasEvalJs(_) => CANVAS_EVAL_JS,
            NodeCommand::CanvasSnapshot(_) => CANVAS_SNAPSHOT,
            NodeCommand::CanvasA2uiReset => CANVAS_A2UI_RESET,
            NodeCommand::CanvasA2uiPush(_) => CANVAS_A2UI_PUSH,
            NodeCommand::CanvasA2uiPushJsonl(_) => CANVAS_A2UI_PUSH_JSONL,
            NodeCommand::CameraSnap(_) => CAMERA_SNAP,
            NodeCommand::CameraClip(_) => CAMERA_CLIP,
            NodeCommand::ScreenRecord(_) => SCREEN_RECORD,
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            NodeCommand::CameraSnap(_) | NodeCommand::CameraClip(_) => Capability::Camera,
            NodeCommand::ScreenRecord(_) => Capability::Screen,
            _ => Capability::Canvas,
        }
    }

    pub fn timeout_class(&self) -> TimeoutClass {
        TimeoutClass::for_command(self.name())
    }
}

fn decode<T: DeserializeOwned>(command: &str, params: serde_json::Value) -> Result<T, CommandError> {
    let params = if params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| invalid(command, &e.to_string()))
}

fn invalid(command: &str, message: &str) -> CommandError {
    CommandError::InvalidParams {
        command: command.to_string(),
        message: message.to_string(),
    }
}

fn parse_jsonl(text: &str) -> Result<Vec<serde_json::Value>, String> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| format!("line {}: {e}", i + 1))
        })
        .collect()
}
