//! Image preprocessing for the detection model
//!
//! Letterboxes an RGB image into the square input a YOLO model expects and
//! converts it to an NCHW tensor in the 0-1 range.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;

/// Gray used by YOLO exports for letterbox padding
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Mapping from model input coordinates back to the source image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Source to model scale factor
    pub scale: f32,
    /// Horizontal padding added on the left, in model pixels
    pub pad_x: f32,
    /// Vertical padding added on top, in model pixels
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a model-space coordinate pair back to source pixels
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize with preserved aspect ratio and pad to `target_size` x `target_size`.
/// Returns the NCHW tensor and the letterbox transform.
pub fn letterbox_tensor(image: &RgbImage, target_size: u32) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let size = target_size as usize;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE);

    if width == 0 || height == 0 {
        return (
            tensor,
            Letterbox {
                scale: 1.0,
                pad_x: 0.0,
                pad_y: 0.0,
            },
        );
    }

    let scale = target_size as f32 / width.max(height) as f32;
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, target_size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + pad_x) as usize;
        let ty = (y + pad_y) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = pixel.0[c] as f32 / 255.0;
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_letterbox_shape() {
        let image = RgbImage::new(320, 240);
        let (tensor, _) = letterbox_tensor(&image, 640);
        assert_eq!(tensor.dim(), (1, 3, 640, 640));
    }

    #[test]
    fn test_letterbox_padding_landscape() {
        let image = RgbImage::from_pixel(640, 320, Rgb([255, 0, 0]));
        let (tensor, letterbox) = letterbox_tensor(&image, 320);

        assert!((letterbox.scale - 0.5).abs() < 1e-6);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 80.0);

        // Padding rows keep the pad value, content rows carry the image
        assert!((tensor[[0, 0, 10, 10]] - PAD_VALUE).abs() < 1e-6);
        assert!((tensor[[0, 0, 160, 10]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 160, 10]].abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_maps_back_to_source() {
        let image = RgbImage::new(1280, 640);
        let (_, letterbox) = letterbox_tensor(&image, 640);

        let (x, y) = letterbox.to_source(320.0, 320.0);
        assert!((x - 640.0).abs() < 0.5);
        assert!((y - 320.0).abs() < 0.5);
    }
}
