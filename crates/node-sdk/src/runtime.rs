//! Per-device invocation dispatch.
//!
//! `handle_invoke` always produces an [`InvocationEnvelope`]: gate checks,
//! param decoding, provider failures, panics and timeouts all become
//! `ok: false` with a code from the fixed set.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use nb_protocol::{
    clamp_quality, Capability, CommandPayload, ErrorCode, EvalPayload, ImageFormat,
    InvocationEnvelope, NodeCommand, TimeoutClass,
};
use parking_lot::RwLock;

use crate::artifact::TempArtifact;
use crate::lock::HardwareLock;
use crate::media;
use crate::providers::CapabilityProviders;
use crate::settings::CapabilitySettings;
use crate::types::{InvokeContext, ProviderError};

/// Bounded wait for interactive commands when the request carries no timeout.
pub const DEFAULT_INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(15);
/// Bounded wait for capture commands when the request carries no timeout.
pub const DEFAULT_MEDIA_TIMEOUT: Duration = Duration::from_secs(120);

pub struct NodeRuntime {
    settings: RwLock<CapabilitySettings>,
    providers: CapabilityProviders,
    camera_lock: HardwareLock,
    screen_lock: HardwareLock,
}

impl NodeRuntime {
    pub fn new(settings: CapabilitySettings, providers: CapabilityProviders) -> Self {
        Self {
            settings: RwLock::new(settings),
            providers,
            camera_lock: HardwareLock::new("camera"),
            screen_lock: HardwareLock::new("screen"),
        }
    }

    pub fn settings(&self) -> CapabilitySettings {
        self.settings.read().clone()
    }

    /// Replace the enablement flags.  Takes effect for the next invocation.
    pub fn update_settings(&self, settings: CapabilitySettings) {
        *self.settings.write() = settings;
    }

    pub fn set_enabled(&self, capability: Capability, enabled: bool) {
        self.settings.write().set_enabled(capability, enabled);
    }

    /// Capability tags advertised in `node_hello`.
    pub fn capabilities(&self) -> Vec<String> {
        self.providers
            .capabilities()
            .into_iter()
            .map(|c| c.as_str().to_string())
            .collect()
    }

    /// Command names advertised in `node_hello`.
    pub fn commands(&self) -> Vec<String> {
        self.providers.commands()
    }

    /// Execute one invocation.  `timeout` of `None` picks the command
    /// family's default.
    pub async fn handle_invoke(
        &self,
        ctx: InvokeContext,
        params: serde_json::Value,
        timeout: Option<Duration>,
    ) -> InvocationEnvelope {
        let command = ctx.command.as_str();

        let Some(capability) = Capability::for_command(command) else {
            return InvocationEnvelope::failure(
                ErrorCode::InvalidRequest,
                format!("unknown command: {command}"),
            );
        };

        let settings = self.settings();
        if !settings.is_enabled(capability) {
            return InvocationEnvelope::failure(
                ErrorCode::Unavailable,
                format!(
                    "{} is disabled on this device; enable the `{}` setting",
                    capability.as_str(),
                    CapabilitySettings::setting_name(capability)
                ),
            );
        }

        let cmd = match NodeCommand::parse(command, params) {
            Ok(cmd) => cmd,
            Err(e) => return InvocationEnvelope::failure(ErrorCode::InvalidRequest, e.to_string()),
        };

        if !self.providers.has(capability) {
            return InvocationEnvelope::failure(
                ErrorCode::Unavailable,
                format!("no {} provider on this device", capability.as_str()),
            );
        }

        let bound = timeout.unwrap_or(match cmd.timeout_class() {
            TimeoutClass::Interactive => DEFAULT_INTERACTIVE_TIMEOUT,
            TimeoutClass::Media => DEFAULT_MEDIA_TIMEOUT,
        });

        let run = AssertUnwindSafe(self.execute(&cmd, &settings)).catch_unwind();
        let outcome = tokio::select! {
            r = tokio::time::timeout(bound, run) => r,
            _ = ctx.cancel.cancelled() => {
                return InvocationEnvelope::failure(ErrorCode::Unavailable, "invocation cancelled");
            }
        };

        match outcome {
            Ok(Ok(Ok(Some(payload)))) => InvocationEnvelope::success(payload),
            Ok(Ok(Ok(None))) => InvocationEnvelope::empty(),
            Ok(Ok(Err(e))) => {
                tracing::debug!(command = %cmd.name(), error = %e, "provider failed");
                InvocationEnvelope::failure(e.code(), e.to_string())
            }
            Ok(Err(_panic)) => {
                tracing::error!(
                    command = %cmd.name(),
                    request_id = %ctx.request_id,
                    "capability provider panicked"
                );
                InvocationEnvelope::failure(ErrorCode::Unavailable, "capability provider panicked")
            }
            Err(_) => {
                tracing::warn!(
                    command = %cmd.name(),
                    timeout_ms = bound.as_millis() as u64,
                    "capability provider timed out"
                );
                InvocationEnvelope::failure(
                    ErrorCode::Timeout,
                    format!("{} did not finish within {}ms", cmd.name(), bound.as_millis()),
                )
            }
        }
    }

    async fn execute(
        &self,
        cmd: &NodeCommand,
        settings: &CapabilitySettings,
    ) -> Result<Option<serde_json::Value>, ProviderError> {
        let unavailable = |what: &str| ProviderError::Unavailable(format!("no {what} provider on this device"));

        match cmd {
            NodeCommand::CanvasShow(p) => {
                let canvas = self.providers.canvas.as_ref().ok_or_else(|| unavailable("canvas"))?;
                canvas.show(p.url.as_deref()).await?;
                Ok(None)
            }
            NodeCommand::CanvasHide => {
                let canvas = self.providers.canvas.as_ref().ok_or_else(|| unavailable("canvas"))?;
                canvas.hide().await?;
                Ok(None)
            }
            NodeCommand::CanvasNavigate(p) => {
                let canvas = self.providers.canvas.as_ref().ok_or_else(|| unavailable("canvas"))?;
                canvas.navigate(&p.url).await?;
                Ok(None)
            }
            NodeCommand::CanvasEvalJs(p) => {
                let canvas = self.providers.canvas.as_ref().ok_or_else(|| unavailable("canvas"))?;
                let result = canvas.eval_js(&p.java_script).await?;
                to_value(CommandPayload::Eval(EvalPayload { result }))
            }
            NodeCommand::CanvasSnapshot(p) => {
                let canvas = self.providers.canvas.as_ref().ok_or_else(|| unavailable("canvas"))?;
                let artifact = stage(settings, "img")?;
                canvas.snapshot(p.format, artifact.path()).await?;
                self.encode_artifact(artifact, p.format, p.max_width, p.quality()).await
            }
            NodeCommand::CanvasA2uiReset => {
                let canvas = self.providers.canvas.as_ref().ok_or_else(|| unavailable("canvas"))?;
                canvas.a2ui_reset().await?;
                Ok(None)
            }
            NodeCommand::CanvasA2uiPush(p) | NodeCommand::CanvasA2uiPushJsonl(p) => {
                let canvas = self.providers.canvas.as_ref().ok_or_else(|| unavailable("canvas"))?;
                canvas.a2ui_push(&p.messages).await?;
                Ok(None)
            }
            NodeCommand::CameraSnap(p) => {
                let camera = self.providers.camera.as_ref().ok_or_else(|| unavailable("camera"))?;
                let _permit = self.camera_lock.try_acquire()?;
                let artifact = stage(settings, "img")?;
                camera.snap(p, artifact.path()).await?;
                self.encode_artifact(artifact, ImageFormat::Jpeg, p.max_width, clamp_quality(p.quality))
                    .await
            }
            NodeCommand::CameraClip(p) => {
                let camera = self.providers.camera.as_ref().ok_or_else(|| unavailable("camera"))?;
                let _permit = self.camera_lock.try_acquire()?;
                let artifact = stage(settings, "mp4")?;
                let info = camera.clip(p, artifact.path()).await?;
                let bytes = read_artifact(&artifact).await?;
                to_value(CommandPayload::Media(media::video_payload(
                    &bytes,
                    info.duration_ms,
                    info.has_audio,
                )))
            }
            NodeCommand::ScreenRecord(p) => {
                let screen = self.providers.screen.as_ref().ok_or_else(|| unavailable("screen"))?;
                let _permit = self.screen_lock.try_acquire()?;
                let artifact = stage(settings, "mp4")?;
                let info = screen.record(p, artifact.path()).await?;
                let bytes = read_artifact(&artifact).await?;
                to_value(CommandPayload::Media(media::video_payload(
                    &bytes,
                    info.duration_ms,
                    info.has_audio,
                )))
            }
        }
    }

    async fn encode_artifact(
        &self,
        artifact: TempArtifact,
        format: ImageFormat,
        max_width: Option<u32>,
        quality: f64,
    ) -> Result<Option<serde_json::Value>, ProviderError> {
        let source = read_artifact(&artifact).await?;
        drop(artifact);
        let encoded = tokio::task::spawn_blocking(move || {
            media::encode_still(&source, format, max_width, quality)
        })
        .await
        .map_err(|e| ProviderError::Unavailable(format!("encoder task failed: {e}")))??;
        to_value(CommandPayload::Media(encoded.into_payload()))
    }
}

fn stage(settings: &CapabilitySettings, extension: &str) -> Result<TempArtifact, ProviderError> {
    TempArtifact::create(&settings.artifact_dir(), extension)
        .map_err(|e| ProviderError::Unavailable(format!("cannot stage capture: {e}")))
}

async fn read_artifact(artifact: &TempArtifact) -> Result<Vec<u8>, ProviderError> {
    let bytes = artifact
        .read()
        .await
        .map_err(|e| ProviderError::Unavailable(format!("capture unreadable: {e}")))?;
    if bytes.is_empty() {
        return Err(ProviderError::Unavailable("provider produced no data".into()));
    }
    Ok(bytes)
}

fn to_value(payload: CommandPayload) -> Result<Option<serde_json::Value>, ProviderError> {
    serde_json::to_value(payload)
        .map(Some)
        .map_err(|e| ProviderError::Unavailable(format!("payload encode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CameraProvider, CanvasProvider, ClipInfo, ScreenProvider};
    use nb_protocol::{
        CameraClipParams, CameraSnapParams, MediaPayload, ScreenRecordParams,
    };
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[derive(Clone, Default)]
    struct FakeCamera {
        calls: Arc<AtomicUsize>,
        seen_paths: Arc<parking_lot::Mutex<Vec<PathBuf>>>,
        clip_delay: Duration,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl CameraProvider for FakeCamera {
        async fn snap(&self, _params: &CameraSnapParams, out: &Path) -> Result<(), ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_paths.lock().push(out.to_path_buf());
            if self.fail {
                return Err(ProviderError::Unavailable("camera permission denied".into()));
            }
            tokio::fs::write(out, png_bytes(1000, 800)).await.unwrap();
            Ok(())
        }

        async fn clip(&self, params: &CameraClipParams, out: &Path) -> Result<ClipInfo, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_paths.lock().push(out.to_path_buf());
            tokio::time::sleep(self.clip_delay).await;
            tokio::fs::write(out, b"mp4-bytes").await.unwrap();
            Ok(ClipInfo {
                duration_ms: params.duration_ms(),
                has_audio: params.include_audio(),
            })
        }
    }

    struct FakeCanvas;

    #[async_trait::async_trait]
    impl CanvasProvider for FakeCanvas {
        async fn show(&self, _url: Option<&str>) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn hide(&self) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn navigate(&self, _url: &str) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn eval_js(&self, script: &str) -> Result<String, ProviderError> {
            if script == "boom" {
                panic!("webview crashed");
            }
            if script == "hang" {
                std::future::pending::<()>().await;
            }
            Ok(format!("evaluated:{script}"))
        }
        async fn snapshot(&self, _format: ImageFormat, out: &Path) -> Result<(), ProviderError> {
            tokio::fs::write(out, png_bytes(64, 48)).await.unwrap();
            Ok(())
        }
        async fn a2ui_reset(&self) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn a2ui_push(&self, messages: &[serde_json::Value]) -> Result<(), ProviderError> {
            if messages.len() > 100 {
                return Err(ProviderError::InvalidParams("too many messages".into()));
            }
            Ok(())
        }
    }

    struct BusyScreen;

    #[async_trait::async_trait]
    impl ScreenProvider for BusyScreen {
        async fn record(&self, _p: &ScreenRecordParams, _out: &Path) -> Result<ClipInfo, ProviderError> {
            Err(ProviderError::Busy("screen capture session already active".into()))
        }
    }

    fn runtime(camera: FakeCamera, settings: CapabilitySettings) -> NodeRuntime {
        NodeRuntime::new(
            settings,
            CapabilityProviders::new()
                .with_canvas(FakeCanvas)
                .with_camera(camera)
                .with_screen(BusyScreen),
        )
    }

    fn settings_in(dir: &Path) -> CapabilitySettings {
        CapabilitySettings {
            artifact_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    fn ctx(command: &str) -> InvokeContext {
        InvokeContext::local(command)
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn disabled_camera_is_unavailable_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let camera = FakeCamera::default();
        let rt = runtime(camera.clone(), settings_in(dir.path()));

        let env = rt.handle_invoke(ctx("camera.snap"), json!({}), None).await;
        assert!(!env.ok);
        assert_eq!(env.error_code(), Some(ErrorCode::Unavailable));
        assert!(env.error.unwrap().message.contains("camera_enabled"));
        assert_eq!(camera.calls.load(Ordering::SeqCst), 0);
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn unknown_namespace_and_command() {
        let rt = runtime(FakeCamera::default(), CapabilitySettings::default());

        let env = rt.handle_invoke(ctx("system.run"), json!({}), None).await;
        assert_eq!(env.error_code(), Some(ErrorCode::InvalidRequest));
        assert!(env.error.unwrap().message.contains("unknown command"));

        let env = rt.handle_invoke(ctx("canvas.explode"), json!({}), None).await;
        assert_eq!(env.error_code(), Some(ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn bad_params_are_invalid_request() {
        let rt = runtime(FakeCamera::default(), CapabilitySettings::default());
        let env = rt
            .handle_invoke(ctx("canvas.navigate"), json!({"url": 42}), None)
            .await;
        assert_eq!(env.error_code(), Some(ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn eval_returns_typed_payload() {
        let rt = runtime(FakeCamera::default(), CapabilitySettings::default());
        let env = rt
            .handle_invoke(ctx("canvas.evalJS"), json!({"javaScript": "1+1"}), None)
            .await;
        assert!(env.ok);
        let payload: EvalPayload = env.decode_payload().unwrap();
        assert_eq!(payload.result, "evaluated:1+1");
    }

    #[tokio::test]
    async fn provider_panic_becomes_unavailable() {
        let rt = runtime(FakeCamera::default(), CapabilitySettings::default());
        let env = rt
            .handle_invoke(ctx("canvas.evalJS"), json!({"javaScript": "boom"}), None)
            .await;
        assert_eq!(env.error_code(), Some(ErrorCode::Unavailable));
    }

    #[tokio::test]
    async fn provider_exceeding_bound_times_out() {
        let rt = runtime(FakeCamera::default(), CapabilitySettings::default());
        let env = rt
            .handle_invoke(
                ctx("canvas.evalJS"),
                json!({"javaScript": "hang"}),
                Some(Duration::from_millis(50)),
            )
            .await;
        assert_eq!(env.error_code(), Some(ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn provider_invalid_params_maps_to_invalid_request() {
        let rt = runtime(FakeCamera::default(), CapabilitySettings::default());
        let messages: Vec<_> = (0..101).map(|i| json!({"n": i})).collect();
        let env = rt
            .handle_invoke(ctx("canvas.a2ui.push"), json!({"messages": messages}), None)
            .await;
        assert_eq!(env.error_code(), Some(ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn snap_downscales_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let camera = FakeCamera::default();
        let mut settings = settings_in(dir.path());
        settings.camera_enabled = true;
        let rt = runtime(camera.clone(), settings);

        let env = rt
            .handle_invoke(ctx("camera.snap"), json!({"maxWidth": 500, "quality": 7.0}), None)
            .await;
        assert!(env.ok, "{env:?}");
        let media: MediaPayload = env.decode_payload().unwrap();
        assert_eq!(media.format, "jpg");
        assert_eq!((media.width, media.height), (Some(500), Some(400)));
        assert!(!media.base64.is_empty());

        assert_eq!(camera.calls.load(Ordering::SeqCst), 1);
        assert!(!camera.seen_paths.lock()[0].exists());
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn provider_failure_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let camera = FakeCamera {
            fail: true,
            ..Default::default()
        };
        let mut settings = settings_in(dir.path());
        settings.camera_enabled = true;
        let rt = runtime(camera.clone(), settings);

        let env = rt.handle_invoke(ctx("camera.snap"), json!({}), None).await;
        assert_eq!(env.error_code(), Some(ErrorCode::Unavailable));
        assert!(env.error.unwrap().message.contains("permission denied"));
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn overlapping_capture_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let camera = FakeCamera {
            clip_delay: Duration::from_millis(200),
            ..Default::default()
        };
        let mut settings = settings_in(dir.path());
        settings.camera_enabled = true;
        let rt = Arc::new(runtime(camera.clone(), settings));

        let first = {
            let rt = rt.clone();
            tokio::spawn(async move {
                rt.handle_invoke(ctx("camera.clip"), json!({"durationMs": 1000}), None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = rt.handle_invoke(ctx("camera.snap"), json!({}), None).await;
        assert_eq!(second.error_code(), Some(ErrorCode::Busy));

        let first = first.await.unwrap();
        assert!(first.ok);
        let media: MediaPayload = first.decode_payload().unwrap();
        assert_eq!(media.format, "mp4");
        assert_eq!(media.duration_ms, Some(1000));
        assert_eq!(media.has_audio, Some(true));
        assert_eq!(camera.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_busy_maps_to_busy() {
        let mut settings = CapabilitySettings::default();
        settings.screen_enabled = true;
        let rt = runtime(FakeCamera::default(), settings);
        let env = rt.handle_invoke(ctx("screen.record"), json!({}), None).await;
        assert_eq!(env.error_code(), Some(ErrorCode::Busy));
    }

    #[tokio::test]
    async fn missing_provider_is_unavailable() {
        let rt = NodeRuntime::new(CapabilitySettings::default(), CapabilityProviders::new());
        let env = rt.handle_invoke(ctx("canvas.hide"), json!(null), None).await;
        assert_eq!(env.error_code(), Some(ErrorCode::Unavailable));
        assert!(rt.commands().is_empty());
    }

    #[tokio::test]
    async fn settings_update_takes_effect() {
        let rt = runtime(FakeCamera::default(), CapabilitySettings::default());
        rt.set_enabled(Capability::Canvas, false);
        let env = rt.handle_invoke(ctx("canvas.hide"), json!({}), None).await;
        assert_eq!(env.error_code(), Some(ErrorCode::Unavailable));

        rt.set_enabled(Capability::Canvas, true);
        let env = rt.handle_invoke(ctx("canvas.hide"), json!({}), None).await;
        assert!(env.ok);
        assert!(env.payload.is_none());
    }

    #[tokio::test]
    async fn canvas_snapshot_png() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(FakeCamera::default(), settings_in(dir.path()));
        let env = rt
            .handle_invoke(ctx("canvas.snapshot"), json!({"format": "png"}), None)
            .await;
        let media: MediaPayload = env.decode_payload().unwrap();
        assert_eq!(media.format, "png");
        assert_eq!(media.width, Some(64));
        assert!(dir_is_empty(dir.path()));
    }
}
