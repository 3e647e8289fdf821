//! A canvas with no rendering engine behind it.

use std::path::Path;

use async_trait::async_trait;
use nb_node_sdk::{CanvasProvider, ImageFormat, ProviderError};
use parking_lot::Mutex;
use serde_json::Value;

const SNAPSHOT_WIDTH: u32 = 640;
const SNAPSHOT_HEIGHT: u32 = 400;

#[derive(Debug, Default)]
struct CanvasState {
    visible: bool,
    url: Option<String>,
    a2ui: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct HeadlessCanvas {
    state: Mutex<CanvasState>,
}

impl HeadlessCanvas {
    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    pub fn a2ui_len(&self) -> usize {
        self.state.lock().a2ui.len()
    }
}

#[async_trait]
impl CanvasProvider for HeadlessCanvas {
    async fn show(&self, url: Option<&str>) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.visible = true;
        if let Some(url) = url {
            state.url = Some(url.to_string());
        }
        Ok(())
    }

    async fn hide(&self) -> Result<(), ProviderError> {
        self.state.lock().visible = false;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), ProviderError> {
        tracing::info!(url = %url, "canvas navigate");
        self.state.lock().url = Some(url.to_string());
        Ok(())
    }

    async fn eval_js(&self, script: &str) -> Result<String, ProviderError> {
        let state = self.state.lock();
        match script.trim().trim_end_matches(';') {
            "location.href" | "window.location.href" => {
                Ok(state.url.clone().unwrap_or_else(|| "about:blank".into()))
            }
            "document.title" => Ok("nodebridge demo".into()),
            _ => Err(ProviderError::Unavailable(
                "headless canvas has no script engine".into(),
            )),
        }
    }

    async fn snapshot(&self, _format: ImageFormat, out: &Path) -> Result<(), ProviderError> {
        let frame = image::RgbImage::from_pixel(SNAPSHOT_WIDTH, SNAPSHOT_HEIGHT, image::Rgb([255, 255, 255]));
        frame
            .save_with_format(out, image::ImageFormat::Png)
            .map_err(|e| ProviderError::Unavailable(format!("snapshot write failed: {e}")))
    }

    async fn a2ui_reset(&self) -> Result<(), ProviderError> {
        self.state.lock().a2ui.clear();
        Ok(())
    }

    async fn a2ui_push(&self, messages: &[Value]) -> Result<(), ProviderError> {
        self.state.lock().a2ui.extend_from_slice(messages);
        Ok(())
    }
}
