//! Detection pipeline
//!
//! decode → validate → detect → (crop → read text → infer)* → deduplicate

use image::RgbImage;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analysis::{Category, ClassifiedItem, InferenceEngine};
use crate::config::{AppConfig, ImageConfig};
use crate::vision::detection::{is_container, is_produce};
use crate::vision::image_prep;
use crate::vision::{
    read_container_text, DetectParams, DetectionRecord, Detector, ImagePrepError, TextReader,
};

/// Produce reported as fruit; all other produce is a vegetable
const FRUIT_LABELS: [&str; 3] = ["apple", "banana", "orange"];

/// Failures surfaced to API callers
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Decode(String),
    #[error("{0}")]
    Validation(String),
    #[error("Detection timed out after {0}s")]
    Timeout(u64),
    #[error("Detection failed: {0}")]
    Unexpected(String),
}

impl From<ImagePrepError> for PipelineError {
    fn from(err: ImagePrepError) -> Self {
        match err {
            ImagePrepError::Decode(_) => PipelineError::Decode(err.to_string()),
            ImagePrepError::Validation(_) => PipelineError::Validation(err.to_string()),
            ImagePrepError::Encode(_) => PipelineError::Unexpected(err.to_string()),
        }
    }
}

/// Result of one detect request
#[derive(Debug, Clone)]
pub struct DetectOutcome {
    pub items: Vec<ClassifiedItem>,
    /// Base64 JPEG with detection boxes, when requested
    pub annotated_image: Option<String>,
}

/// Owns the loaded adapters; shared read-only across requests
pub struct FoodPipeline {
    detector: Detector,
    reader: TextReader,
    engine: InferenceEngine,
    params: DetectParams,
    image: ImageConfig,
}

impl FoodPipeline {
    pub fn new(
        detector: Detector,
        reader: TextReader,
        engine: InferenceEngine,
        params: DetectParams,
        image: ImageConfig,
    ) -> Self {
        Self {
            detector,
            reader,
            engine,
            params,
            image,
        }
    }

    /// Load both adapters from configuration. Never fails; missing engines
    /// leave the adapters degraded.
    pub fn load(config: &AppConfig, model_path: &Path) -> Self {
        let detector = Detector::load(model_path, &config.detection);
        let reader = TextReader::load(&config.ocr);

        if let Some(reason) = detector.degraded_reason() {
            warn!("Detector running on mock data: {}", reason);
        }
        if let Some(reason) = reader.degraded_reason() {
            warn!("Text reader running on mock data: {}", reason);
        }
        info!(
            "Pipeline ready (detection: {}, ocr: {})",
            detector.is_ready(),
            reader.is_ready()
        );

        Self::new(
            detector,
            reader,
            InferenceEngine::new(),
            DetectParams::from(&config.detection),
            config.image.clone(),
        )
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn reader(&self) -> &TextReader {
        &self.reader
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    /// Full request path from a transport-encoded image
    pub fn detect_from_base64(&self, encoded: &str, annotate: bool) -> Result<DetectOutcome, PipelineError> {
        let decoded = image_prep::decode(encoded)?;
        image_prep::validate(&decoded)?;
        let image = decoded.to_rgb8();

        let detections = self.detector.detect(&image, &self.params);
        let items = self.classify_detections(&image, &detections);

        let annotated_image = if annotate {
            let drawn = image_prep::draw_detections(&image, &detections);
            let preview = image_prep::resize(&drawn, self.image.max_image_size);
            Some(image_prep::encode_base64(&preview, self.image.jpeg_quality)?)
        } else {
            None
        };

        Ok(DetectOutcome {
            items,
            annotated_image,
        })
    }

    /// Detect and classify everything in an image
    #[cfg(test)]
    pub fn classify(&self, image: &RgbImage) -> Vec<ClassifiedItem> {
        let detections = self.detector.detect(image, &self.params);
        self.classify_detections(image, &detections)
    }

    fn classify_detections(&self, image: &RgbImage, detections: &[DetectionRecord]) -> Vec<ClassifiedItem> {
        let items: Vec<ClassifiedItem> = detections
            .iter()
            .filter_map(|det| self.classify_one(image, det))
            .collect();

        self.engine.deduplicate_items(items)
    }

    fn classify_one(&self, image: &RgbImage, det: &DetectionRecord) -> Option<ClassifiedItem> {
        let label = det.label.as_str();

        if is_produce(label) {
            let category = if FRUIT_LABELS.contains(&label) {
                Category::Fruit
            } else {
                Category::Vegetable
            };
            return Some(ClassifiedItem::new(category, label, det.confidence, None));
        }

        if is_container(label) {
            let crop = image_prep::crop(image, &det.bbox, self.image.crop_padding);
            let text = read_container_text(&self.reader, &crop);
            let name = match self.engine.infer_from_text(text.as_deref()) {
                Some(food) => food.to_string(),
                None => format!("Unknown {}", label),
            };
            return Some(ClassifiedItem::new(Category::Packaged, &name, det.confidence, text));
        }

        debug!("Skipping unclassified detection '{}'", label);
        None
    }
}
