//! Still-image normalization and base64 media payloads.

use std::io::Cursor;

use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use nb_protocol::{ImageFormat, MediaPayload};

use crate::types::ProviderError;

/// An encoded still ready for the envelope.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn into_payload(self) -> MediaPayload {
        MediaPayload {
            format: self.format.extension().to_string(),
            base64: encode_base64(&self.bytes),
            width: Some(self.width),
            height: Some(self.height),
            duration_ms: None,
            has_audio: None,
        }
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Output size for a `width`×`height` source bounded by `max_width`.
///
/// Only down-scales, and only when the source is wider than the bound.  The
/// aspect ratio is kept; height rounds to the nearest pixel (minimum 1).
pub fn target_dimensions(width: u32, height: u32, max_width: Option<u32>) -> (u32, u32) {
    match max_width {
        Some(max) if max > 0 && width > max => {
            let scaled = (height as f64 * max as f64 / width as f64).round() as u32;
            (max, scaled.max(1))
        }
        _ => (width, height),
    }
}

/// Decode a captured still, bound its width, and re-encode it.
///
/// `quality` is only used for JPEG and must already be clamped.
pub fn encode_still(
    source: &[u8],
    format: ImageFormat,
    max_width: Option<u32>,
    quality: f64,
) -> Result<EncodedImage, ProviderError> {
    let img = image::load_from_memory(source)
        .map_err(|e| ProviderError::Unavailable(format!("captured image unreadable: {e}")))?;

    let (w, h) = target_dimensions(img.width(), img.height(), max_width);
    let img = if (w, h) != (img.width(), img.height()) {
        img.resize_exact(w, h, FilterType::Triangle)
    } else {
        img
    };

    let mut bytes = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let q = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, q)
                .encode_image(&rgb)
                .map_err(|e| ProviderError::Unavailable(format!("jpeg encode failed: {e}")))?;
        }
        ImageFormat::Png => {
            img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
                .map_err(|e| ProviderError::Unavailable(format!("png encode failed: {e}")))?;
        }
    }

    Ok(EncodedImage {
        format,
        bytes,
        width: w,
        height: h,
    })
}

/// Payload for a finished MP4 recording.
pub fn video_payload(bytes: &[u8], duration_ms: u64, has_audio: bool) -> MediaPayload {
    MediaPayload {
        format: "mp4".into(),
        base64: encode_base64(bytes),
        width: None,
        height: None,
        duration_ms: Some(duration_ms),
        has_audio: Some(has_audio),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40])));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn downscale_preserves_aspect() {
        assert_eq!(target_dimensions(1000, 800, Some(500)), (500, 400));
        assert_eq!(target_dimensions(400, 300, Some(500)), (400, 300));
        assert_eq!(target_dimensions(1000, 800, None), (1000, 800));
        assert_eq!(target_dimensions(1000, 800, Some(0)), (1000, 800));
        assert_eq!(target_dimensions(3000, 1, Some(10)), (10, 1));
    }

    #[test]
    fn encodes_bounded_jpeg() {
        let encoded = encode_still(&png_fixture(1000, 800), ImageFormat::Jpeg, Some(500), 0.8).unwrap();
        assert_eq!((encoded.width, encoded.height), (500, 400));

        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (500, 400));

        let payload = encoded.into_payload();
        assert_eq!(payload.format, "jpg");
        assert_eq!(payload.width, Some(500));
    }

    #[test]
    fn png_output_keeps_small_sources() {
        let encoded = encode_still(&png_fixture(40, 30), ImageFormat::Png, Some(500), 0.9).unwrap();
        assert_eq!((encoded.width, encoded.height), (40, 30));
        assert_eq!(encoded.into_payload().format, "png");
    }

    #[test]
    fn garbage_input_is_unavailable() {
        let err = encode_still(b"not an image", ImageFormat::Jpeg, None, 0.9).unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn video_payload_shape() {
        let p = video_payload(b"\x00\x01", 3000, true);
        assert_eq!(p.format, "mp4");
        assert_eq!(p.base64, "AAE=");
        assert_eq!(p.duration_ms, Some(3000));
    }
}
