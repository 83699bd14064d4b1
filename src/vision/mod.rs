//! Vision Layer
//!
//! Turns an uploaded fridge photo into detections and label text:
//! - `image_prep`: transport decoding, validation, cropping, resizing
//! - `detection`: YOLO object detector adapter (ONNX Runtime)
//! - `ocr`: text reader adapter (Tesseract)
//!
//! Both model adapters degrade to fixed mock output when their backend is missing,
//! so callers never have to handle an absent model.

pub mod detection;
pub mod image_prep;
pub mod models;
pub mod ocr;
pub mod ocr_preprocess;
pub mod preprocess;

pub use detection::{DetectParams, Detector};
pub use image_prep::ImagePrepError;
pub use models::ModelManager;
pub use ocr::{read_container_text, TextReader};

/// Axis-aligned box in source image pixels, corners inclusive-exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// A box is usable only when both corners are strictly ordered
    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }
}

/// Normalized detector output for a single object
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    /// Canonical lowercase class name
    pub label: String,
    /// Detection confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Location in the source image
    pub bbox: BoundingBox,
}

impl DetectionRecord {
    pub fn new(label: &str, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            bbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_dimensions() {
        let bbox = BoundingBox::new(10, 20, 110, 70);
        assert_eq!(bbox.width(), 100);
        assert_eq!(bbox.height(), 50);
        assert!(bbox.is_valid());
    }

    #[test]
    fn test_degenerate_bounding_box() {
        assert!(!BoundingBox::new(10, 10, 10, 20).is_valid());
        assert!(!BoundingBox::new(10, 30, 20, 20).is_valid());
    }
}
