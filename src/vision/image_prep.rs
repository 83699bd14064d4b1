//! Image preparation
//!
//! Decodes transport-encoded photos and produces the buffers the detector and
//! text reader consume. Buffers are RGB8; the channel order differs from a BGR
//! capture but the layout (height x width x 3) is the same.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, error};

use super::ocr_preprocess::{apply_clahe, denoise, sharpen, to_grayscale};
use super::DetectionRecord;
use super::BoundingBox;

/// Smallest accepted side length in pixels
pub const MIN_DIMENSION: u32 = 50;
/// Largest accepted side length in pixels
pub const MAX_DIMENSION: u32 = 4000;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

#[derive(Debug, Error)]
pub enum ImagePrepError {
    #[error("Image decoding failed: {0}")]
    Decode(String),
    #[error("{0}")]
    Validation(String),
    #[error("Image encoding failed: {0}")]
    Encode(String),
}

/// Decode a base64 payload, optionally prefixed with a `data:...;base64,` header,
/// into a 3-channel image
pub fn decode(encoded: &str) -> Result<DynamicImage, ImagePrepError> {
    let payload = match encoded.split_once(',') {
        Some((_, data)) => data,
        None => encoded,
    };
    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let bytes = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| ImagePrepError::Decode(e.to_string()))?;

    if bytes.is_empty() {
        return Err(ImagePrepError::Decode("empty image payload".to_string()));
    }

    let image = image::load_from_memory(&bytes).map_err(|e| {
        error!("Image decoding failed: {}", e);
        ImagePrepError::Decode(format!("Failed to decode image - invalid image data ({})", e))
    })?;

    if image.width() == 0 || image.height() == 0 {
        return Err(ImagePrepError::Decode("decoded image is empty".to_string()));
    }

    debug!("Decoded {}x{} image", image.width(), image.height());
    Ok(DynamicImage::ImageRgb8(image.into_rgb8()))
}

/// Check an image is fit for processing
pub fn validate(image: &DynamicImage) -> Result<(), ImagePrepError> {
    let (width, height) = (image.width(), image.height());

    if width == 0 || height == 0 {
        return Err(ImagePrepError::Validation("Image is empty".to_string()));
    }

    let channels = image.color().channel_count();
    if channels < 3 {
        return Err(ImagePrepError::Validation(
            "Image must be 3-dimensional (color)".to_string(),
        ));
    }
    if channels != 3 {
        return Err(ImagePrepError::Validation(
            "Image must have 3 color channels".to_string(),
        ));
    }

    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(ImagePrepError::Validation(format!(
            "Image too small (minimum {}x{})",
            MIN_DIMENSION, MIN_DIMENSION
        )));
    }

    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ImagePrepError::Validation(format!(
            "Image too large (maximum {}x{})",
            MAX_DIMENSION, MAX_DIMENSION
        )));
    }

    Ok(())
}

/// Crop a box grown by `padding` on every side, clamped to the image.
/// A box lying outside the image yields an empty buffer instead of an error.
pub fn crop(image: &RgbImage, bbox: &BoundingBox, padding: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let pad = padding as i64;

    let clamp = |value: i64, max: u32| value.clamp(0, max as i64) as u32;
    let x1 = clamp(bbox.x1 as i64 - pad, width);
    let y1 = clamp(bbox.y1 as i64 - pad, height);
    let x2 = clamp(bbox.x2 as i64 + pad, width);
    let y2 = clamp(bbox.y2 as i64 + pad, height);

    let crop_w = x2.saturating_sub(x1);
    let crop_h = y2.saturating_sub(y1);
    if crop_w == 0 || crop_h == 0 {
        return RgbImage::new(0, 0);
    }

    image::imageops::crop_imm(image, x1, y1, crop_w, crop_h).to_image()
}

/// Downscale so neither side exceeds `max_dimension`, keeping the aspect ratio
pub fn resize(image: &RgbImage, max_dimension: u32) -> RgbImage {
    let (width, height) = image.dimensions();

    if width.max(height) <= max_dimension || max_dimension == 0 {
        return image.clone();
    }

    let (new_width, new_height) = if width > height {
        let h = (height as u64 * max_dimension as u64 / width as u64) as u32;
        (max_dimension, h.max(1))
    } else {
        let w = (width as u64 * max_dimension as u64 / height as u64) as u32;
        (w.max(1), max_dimension)
    };

    image::imageops::resize(image, new_width, new_height, FilterType::Triangle)
}

/// Grayscale, local contrast normalization, denoise and sharpen for
/// low-contrast packaging
pub fn enhance_for_recognition(image: &RgbImage) -> GrayImage {
    let gray = to_grayscale(image);
    let enhanced = apply_clahe(&gray, 2.0, 8);
    let denoised = denoise(&enhanced);
    sharpen(&denoised)
}

/// Encode as base64 JPEG
pub fn encode_base64(image: &RgbImage, quality: u8) -> Result<String, ImagePrepError> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder
        .encode_image(image)
        .map_err(|e| ImagePrepError::Encode(e.to_string()))?;

    Ok(STANDARD.encode(&buffer))
}

/// Draw detection boxes onto a copy of the image
pub fn draw_detections(image: &RgbImage, detections: &[DetectionRecord]) -> RgbImage {
    let mut result = image.clone();

    for det in detections {
        let bbox = det.bbox;
        if !bbox.is_valid() {
            continue;
        }
        // Two nested outlines give a 2px stroke
        for inset in 0..2 {
            let w = bbox.width() - 2 * inset;
            let h = bbox.height() - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(bbox.x1 + inset, bbox.y1 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut result, rect, BOX_COLOR);
        }
    }

    result
}
