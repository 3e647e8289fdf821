//! Capability provider traits and the registry the runtime dispatches into.
//!
//! Providers are the device-specific implementations (AVFoundation,
//! CameraX, a WKWebView, ...).  They see typed params and write captured
//! media to a path the runtime allocates; encoding and cleanup stay in the
//! runtime.

use std::path::Path;
use std::sync::Arc;

use nb_protocol::{
    Capability, CameraClipParams, CameraSnapParams, ImageFormat, ScreenRecordParams,
};

use crate::types::ProviderError;

/// Duration and audio flag of a finished recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipInfo {
    pub duration_ms: u64,
    pub has_audio: bool,
}

/// On-device webview.
#[async_trait::async_trait]
pub trait CanvasProvider: Send + Sync + 'static {
    async fn show(&self, url: Option<&str>) -> Result<(), ProviderError>;
    async fn hide(&self) -> Result<(), ProviderError>;
    async fn navigate(&self, url: &str) -> Result<(), ProviderError>;
    /// Evaluate a script and return its value stringified.
    async fn eval_js(&self, script: &str) -> Result<String, ProviderError>;
    /// Write the current canvas contents to `out` in any decodable image format.
    async fn snapshot(&self, format: ImageFormat, out: &Path) -> Result<(), ProviderError>;
    async fn a2ui_reset(&self) -> Result<(), ProviderError>;
    async fn a2ui_push(&self, messages: &[serde_json::Value]) -> Result<(), ProviderError>;
}

#[async_trait::async_trait]
pub trait CameraProvider: Send + Sync + 'static {
    /// Capture a still into `out` (any decodable image format).
    async fn snap(&self, params: &CameraSnapParams, out: &Path) -> Result<(), ProviderError>;
    /// Record an MP4 clip into `out`.
    async fn clip(&self, params: &CameraClipParams, out: &Path) -> Result<ClipInfo, ProviderError>;
}

#[async_trait::async_trait]
pub trait ScreenProvider: Send + Sync + 'static {
    /// Record the screen as MP4 into `out`.
    async fn record(
        &self,
        params: &ScreenRecordParams,
        out: &Path,
    ) -> Result<ClipInfo, ProviderError>;
}

/// The providers a node has available.
///
/// ```rust,no_run
/// # use nb_node_sdk::CapabilityProviders;
/// let providers = CapabilityProviders::new();
/// // .with_canvas(MyWebView::new())
/// // .with_camera(MyCamera::new());
/// ```
#[derive(Clone, Default)]
pub struct CapabilityProviders {
    pub(crate) canvas: Option<Arc<dyn CanvasProvider>>,
    pub(crate) camera: Option<Arc<dyn CameraProvider>>,
    pub(crate) screen: Option<Arc<dyn ScreenProvider>>,
}

impl CapabilityProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_canvas<P: CanvasProvider>(mut self, provider: P) -> Self {
        self.canvas = Some(Arc::new(provider));
        self
    }

    pub fn with_camera<P: CameraProvider>(mut self, provider: P) -> Self {
        self.camera = Some(Arc::new(provider));
        self
    }

    pub fn with_screen<P: ScreenProvider>(mut self, provider: P) -> Self {
        self.screen = Some(Arc::new(provider));
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Canvas => self.canvas.is_some(),
            Capability::Camera => self.camera.is_some(),
            Capability::Screen => self.screen.is_some(),
        }
    }

    /// Capabilities with a registered provider, in a stable order.
    pub fn capabilities(&self) -> Vec<Capability> {
        [Capability::Canvas, Capability::Camera, Capability::Screen]
            .into_iter()
            .filter(|c| self.has(*c))
            .collect()
    }

    /// Command names backed by a registered provider.
    pub fn commands(&self) -> Vec<String> {
        self.capabilities()
            .into_iter()
            .flat_map(|c| c.commands().iter().map(|s| s.to_string()))
            .collect()
    }
}
