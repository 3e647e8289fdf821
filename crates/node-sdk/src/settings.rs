//! On-device capability enablement.
//!
//! The host app owns these flags (usually a settings screen) and injects them
//! into the [`NodeRuntime`](crate::runtime::NodeRuntime) at construction.

use std::path::PathBuf;

use nb_protocol::Capability;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySettings {
    #[serde(default = "d_true")]
    pub canvas_enabled: bool,
    #[serde(default)]
    pub camera_enabled: bool,
    #[serde(default)]
    pub screen_enabled: bool,
    /// Where captured media is staged before encoding.  Defaults to the OS
    /// temp dir.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
}

fn d_true() -> bool {
    true
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        Self {
            canvas_enabled: true,
            camera_enabled: false,
            screen_enabled: false,
            artifact_dir: None,
        }
    }
}

impl CapabilitySettings {
    pub fn is_enabled(&self, capability: Capability) -> bool {
        match capability {
            Capability::Canvas => self.canvas_enabled,
            Capability::Camera => self.camera_enabled,
            Capability::Screen => self.screen_enabled,
        }
    }

    pub fn set_enabled(&mut self, capability: Capability, enabled: bool) {
        match capability {
            Capability::Canvas => self.canvas_enabled = enabled,
            Capability::Camera => self.camera_enabled = enabled,
            Capability::Screen => self.screen_enabled = enabled,
        }
    }

    /// Name of the setting a user must flip to enable `capability`.
    pub fn setting_name(capability: Capability) -> &'static str {
        match capability {
            Capability::Canvas => "canvas_enabled",
            Capability::Camera => "camera_enabled",
            Capability::Screen => "screen_enabled",
        }
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
