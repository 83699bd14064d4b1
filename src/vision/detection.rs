//! Food and container detection
//!
//! Wraps a YOLO detector exported to ONNX. Raw model output is decoded,
//! suppressed, filtered to the food/container vocabulary and normalized into
//! [`DetectionRecord`]s. When the model cannot be loaded the adapter stays in
//! degraded mode for its whole lifetime and serves a fixed set of mock
//! detections instead, so the rest of the pipeline keeps working on machines
//! without weights installed.

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{ArrayViewD, Ix3};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::models::OnnxSession;
use super::preprocess::{letterbox_tensor, Letterbox};
use super::{BoundingBox, DetectionRecord};
use crate::config::DetectionConfig;

/// Fresh produce classified directly from the detector label
pub const PRODUCE_CLASSES: [&str; 10] = [
    "apple", "banana", "orange", "broccoli", "carrot", "potato", "tomato", "cucumber", "lettuce",
    "onion",
];

/// Packaging that is routed through text recognition
pub const CONTAINER_CLASSES: [&str; 6] = ["bottle", "box", "cup", "container", "bowl", "package"];

/// Food-adjacent classes recognized by class id only
pub const AUXILIARY_FOOD_CLASSES: [(u32, &str); 5] = [
    (48, "sandwich"),
    (52, "hot dog"),
    (53, "pizza"),
    (54, "donut"),
    (55, "cake"),
];

/// COCO class names in YOLO output order
pub const COCO_CLASS_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

pub fn is_produce(label: &str) -> bool {
    PRODUCE_CLASSES.contains(&label)
}

pub fn is_container(label: &str) -> bool {
    CONTAINER_CLASSES.contains(&label)
}

fn auxiliary_name(class_id: u32) -> Option<&'static str> {
    AUXILIARY_FOOD_CLASSES
        .iter()
        .find(|(id, _)| *id == class_id)
        .map(|(_, name)| *name)
}

/// Inference parameters for a detect call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Minimum confidence (0.0 - 1.0)
    pub confidence_threshold: f32,
    /// Maximum detections kept after suppression
    pub max_detections: usize,
    /// IoU above which overlapping same-class boxes are suppressed
    pub iou_threshold: f32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            max_detections: 50,
            iou_threshold: 0.4,
        }
    }
}

impl From<&DetectionConfig> for DetectParams {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            max_detections: config.max_detections,
            iou_threshold: config.iou_threshold,
        }
    }
}

/// Model output before vocabulary filtering
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    /// [x_min, y_min, x_max, y_max] in source pixels
    pub bbox: [f32; 4],
}

/// Object detection model boundary
pub trait DetectionBackend: Send + Sync {
    fn infer(&self, image: &RgbImage, params: &DetectParams) -> Result<Vec<RawDetection>>;
}

/// YOLOv8-style detector running on ONNX Runtime
pub struct YoloOnnx {
    /// ort sessions need exclusive access to run
    session: Mutex<OnnxSession>,
    input_name: String,
    input_size: u32,
    class_names: Vec<String>,
}

impl YoloOnnx {
    pub fn load(model_path: &Path, input_size: u32, class_names: Vec<String>) -> Result<Self> {
        let session = OnnxSession::new(model_path)?;
        if session.input_names().len() != 1 || session.output_names().is_empty() {
            anyhow::bail!(
                "Model at {:?} is not a single-input detector (inputs: {:?}, outputs: {:?})",
                model_path,
                session.input_names(),
                session.output_names()
            );
        }

        let input_name = session.input_names()[0].clone();
        Ok(Self {
            session: Mutex::new(session),
            input_name,
            input_size,
            class_names,
        })
    }
}

impl DetectionBackend for YoloOnnx {
    fn infer(&self, image: &RgbImage, params: &DetectParams) -> Result<Vec<RawDetection>> {
        let (tensor, letterbox) = letterbox_tensor(image, self.input_size);
        let input_value = Value::from_array(tensor).context("Failed to create input tensor")?;

        let candidates = {
            let mut session = self.session.lock();
            let outputs = session
                .session_mut()
                .run(ort::inputs![&self.input_name => input_value])
                .context("Detection inference failed")?;
            let output = outputs[0]
                .try_extract_array::<f32>()
                .context("Failed to extract output tensor")?;

            decode_yolo_output(
                output,
                &self.class_names,
                &letterbox,
                params.confidence_threshold,
                image.dimensions(),
            )?
        };

        debug!("{} candidates before suppression", candidates.len());
        Ok(non_maximum_suppression(
            candidates,
            params.iou_threshold,
            params.max_detections,
        ))
    }
}

/// Decode a `[1, 4 + classes, anchors]` (or transposed) YOLO head into candidates
pub fn decode_yolo_output(
    output: ArrayViewD<f32>,
    class_names: &[String],
    letterbox: &Letterbox,
    confidence_threshold: f32,
    (width, height): (u32, u32),
) -> Result<Vec<RawDetection>> {
    let output = output
        .into_dimensionality::<Ix3>()
        .context("Expected a 3-dimensional detection output")?;
    let (_, rows, cols) = output.dim();

    let num_classes = class_names.len();
    let features = 4 + num_classes;
    let (anchors, transposed) = if rows == features {
        (cols, false)
    } else if cols == features {
        (rows, true)
    } else {
        anyhow::bail!(
            "Output shape {:?} does not match {} classes",
            output.shape(),
            num_classes
        );
    };

    let at = |anchor: usize, feature: usize| {
        if transposed {
            output[[0, anchor, feature]]
        } else {
            output[[0, feature, anchor]]
        }
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (0..num_classes)
            .map(|c| (c, at(anchor, 4 + c)))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });

        if score < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
        let (x1, y1) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);

        candidates.push(RawDetection {
            class_id: class_id as u32,
            class_name: class_names[class_id].clone(),
            confidence: score,
            bbox: [
                x1.clamp(0.0, width as f32),
                y1.clamp(0.0, height as f32),
                x2.clamp(0.0, width as f32),
                y2.clamp(0.0, height as f32),
            ],
        });
    }

    Ok(candidates)
}

/// Per-class greedy suppression, highest confidence first
pub fn non_maximum_suppression(
    mut detections: Vec<RawDetection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawDetection> = Vec::new();
    for det in detections {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == det.class_id && iou(&k.bbox, &det.bbox) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }

    kept
}

/// Intersection over union of two corner boxes
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = ix * iy;

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

enum DetectorState {
    Ready(Box<dyn DetectionBackend>),
    Degraded { reason: String },
}

/// Detector adapter. Constructed once per process; the backend is only read
/// afterwards, so a single instance can serve concurrent requests.
pub struct Detector {
    state: DetectorState,
}

impl Detector {
    /// Load the ONNX model, falling back to mock mode if it is missing or broken
    pub fn load(model_path: &Path, config: &DetectionConfig) -> Self {
        if !model_path.is_file() {
            warn!(
                "Detector model not found at {:?}. Using mock detection.",
                model_path
            );
            return Self::degraded("model file not found");
        }

        let class_names = config
            .class_names
            .clone()
            .unwrap_or_else(|| COCO_CLASS_NAMES.iter().map(|s| s.to_string()).collect());

        match YoloOnnx::load(model_path, config.input_size, class_names) {
            Ok(backend) => {
                info!("Detector model loaded successfully");
                Self::with_backend(Box::new(backend))
            }
            Err(e) => {
                error!("Failed to load detector model: {:#}", e);
                Self::degraded(&format!("{:#}", e))
            }
        }
    }

    /// Wrap an already loaded backend
    pub fn with_backend(backend: Box<dyn DetectionBackend>) -> Self {
        Self {
            state: DetectorState::Ready(backend),
        }
    }

    /// A detector that only ever returns mock detections
    pub fn degraded(reason: &str) -> Self {
        Self {
            state: DetectorState::Degraded {
                reason: reason.to_string(),
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, DetectorState::Ready(_))
    }

    /// Why the detector is degraded, if it is
    pub fn degraded_reason(&self) -> Option<&str> {
        match &self.state {
            DetectorState::Ready(_) => None,
            DetectorState::Degraded { reason } => Some(reason),
        }
    }

    /// Detect food and containers. Never fails: a degraded detector or an
    /// inference error yields the mock detections.
    pub fn detect(&self, image: &RgbImage, params: &DetectParams) -> Vec<DetectionRecord> {
        let backend = match &self.state {
            DetectorState::Ready(backend) => backend,
            DetectorState::Degraded { .. } => return Self::mock_detections(),
        };

        match backend.infer(image, params) {
            Ok(raw) => {
                let detections = normalize_detections(raw, params.confidence_threshold);
                info!("Detected {} food items", detections.len());
                detections
            }
            Err(e) => {
                error!("Detection failed: {:#}", e);
                Self::mock_detections()
            }
        }
    }

    /// Fixed demo detections served in degraded mode
    pub fn mock_detections() -> Vec<DetectionRecord> {
        vec![
            DetectionRecord::new("apple", 0.91, BoundingBox::new(100, 100, 200, 200)),
            DetectionRecord::new("banana", 0.87, BoundingBox::new(250, 150, 400, 250)),
            DetectionRecord::new("bottle", 0.85, BoundingBox::new(450, 100, 550, 300)),
            DetectionRecord::new("box", 0.79, BoundingBox::new(300, 300, 450, 450)),
        ]
    }
}

/// Keep vocabulary classes above threshold and map them to canonical labels,
/// preserving model order
fn normalize_detections(raw: Vec<RawDetection>, confidence_threshold: f32) -> Vec<DetectionRecord> {
    raw.into_iter()
        .filter(|det| det.confidence >= confidence_threshold)
        .filter_map(|det| {
            let class_lower = det.class_name.to_lowercase();
            let label = match auxiliary_name(det.class_id) {
                Some(name) => name.to_string(),
                None if is_produce(&class_lower) || is_container(&class_lower) => class_lower,
                None => return None,
            };

            let [x1, y1, x2, y2] = det.bbox;
            let bbox = BoundingBox::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32);
            if !bbox.is_valid() {
                debug!("Dropping degenerate box for {}", label);
                return None;
            }

            let confidence = (det.confidence * 100.0).round() / 100.0;
            Some(DetectionRecord {
                label,
                confidence,
                bbox,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    struct FixedBackend(Vec<RawDetection>);

    impl DetectionBackend for FixedBackend {
        fn infer(&self, _image: &RgbImage, _params: &DetectParams) -> Result<Vec<RawDetection>> {
            Ok(self.0.clone())
        }
    }

    struct FailingBackend;

    impl DetectionBackend for FailingBackend {
        fn infer(&self, _image: &RgbImage, _params: &DetectParams) -> Result<Vec<RawDetection>> {
            anyhow::bail!("session exploded")
        }
    }

    fn raw(class_id: u32, name: &str, confidence: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            class_id,
            class_name: name.to_string(),
            confidence,
            bbox,
        }
    }

    #[test]
    fn test_degraded_returns_mock() {
        let detector = Detector::degraded("no weights");
        assert!(!detector.is_ready());
        assert_eq!(detector.degraded_reason(), Some("no weights"));

        let detections = detector.detect(&RgbImage::new(640, 480), &DetectParams::default());
        let labels: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["apple", "banana", "bottle", "box"]);
        assert_eq!(detections[2].bbox, BoundingBox::new(450, 100, 550, 300));
        assert!((detections[3].confidence - 0.79).abs() < 1e-6);
    }

    #[test]
    fn test_mock_is_deterministic() {
        assert_eq!(Detector::mock_detections(), Detector::mock_detections());
    }

    #[test]
    fn test_load_missing_model_degrades() {
        let detector = Detector::load(
            Path::new("/nonexistent/yolov8n.onnx"),
            &DetectionConfig::default(),
        );
        assert!(!detector.is_ready());
    }

    #[test]
    fn test_ready_filters_vocabulary_and_threshold() {
        let detector = Detector::with_backend(Box::new(FixedBackend(vec![
            raw(0, "person", 0.95, [0.0, 0.0, 50.0, 50.0]),
            raw(47, "apple", 0.40, [0.0, 0.0, 50.0, 50.0]),
            raw(39, "bottle", 0.876, [10.4, 20.9, 60.2, 120.7]),
            raw(50, "Broccoli", 0.7, [5.0, 5.0, 25.0, 25.0]),
            raw(52, "hotdog_custom", 0.66, [1.0, 1.0, 9.0, 9.0]),
        ])));
        assert!(detector.is_ready());

        let detections = detector.detect(&RgbImage::new(200, 200), &DetectParams::default());
        let labels: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["bottle", "broccoli", "hot dog"]);

        assert!((detections[0].confidence - 0.88).abs() < 1e-6);
        assert_eq!(detections[0].bbox, BoundingBox::new(10, 20, 60, 120));
    }

    #[test]
    fn test_ready_drops_degenerate_boxes() {
        let detector = Detector::with_backend(Box::new(FixedBackend(vec![raw(
            47,
            "apple",
            0.9,
            [10.2, 10.0, 10.9, 30.0],
        )])));

        let detections = detector.detect(&RgbImage::new(100, 100), &DetectParams::default());
        assert!(detections.is_empty());
    }

    #[test]
    fn test_inference_failure_falls_back_per_call() {
        let detector = Detector::with_backend(Box::new(FailingBackend));

        let detections = detector.detect(&RgbImage::new(100, 100), &DetectParams::default());
        assert_eq!(detections, Detector::mock_detections());
        assert!(detector.is_ready());
    }

    #[test]
    fn test_vocabulary_helpers() {
        assert!(is_produce("tomato"));
        assert!(!is_produce("bottle"));
        assert!(is_container("package"));
        assert!(!is_container("pizza"));
        assert_eq!(auxiliary_name(53), Some("pizza"));
        assert_eq!(auxiliary_name(47), None);
        assert_eq!(COCO_CLASS_NAMES[47], "apple");
        assert_eq!(COCO_CLASS_NAMES[39], "bottle");
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let detections = vec![
            raw(47, "apple", 0.8, [0.0, 0.0, 100.0, 100.0]),
            raw(47, "apple", 0.9, [5.0, 5.0, 105.0, 105.0]),
            raw(46, "banana", 0.7, [0.0, 0.0, 100.0, 100.0]),
        ];

        let kept = non_maximum_suppression(detections, 0.4, 50);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(kept[1].class_name, "banana");
    }

    #[test]
    fn test_nms_respects_max_detections() {
        let detections = (0..10)
            .map(|i| raw(47, "apple", 0.5 + i as f32 * 0.01, [i as f32 * 200.0, 0.0, i as f32 * 200.0 + 50.0, 50.0]))
            .collect();

        let kept = non_maximum_suppression(detections, 0.4, 3);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_iou() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        assert!((iou(&a, &[5.0, 0.0, 15.0, 10.0]) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_yolo_output() {
        let class_names = vec!["apple".to_string(), "bottle".to_string()];
        // [1, 4 + 2 classes, 2 anchors]
        let mut output = Array3::<f32>::zeros((1, 6, 2));
        // Anchor 0: bottle at center (50, 60), 20x40
        output[[0, 0, 0]] = 50.0;
        output[[0, 1, 0]] = 60.0;
        output[[0, 2, 0]] = 20.0;
        output[[0, 3, 0]] = 40.0;
        output[[0, 4, 0]] = 0.1;
        output[[0, 5, 0]] = 0.9;
        // Anchor 1: below threshold
        output[[0, 4, 1]] = 0.2;

        let letterbox = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let candidates =
            decode_yolo_output(output.into_dyn().view(), &class_names, &letterbox, 0.5, (640, 640))
                .unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class_id, 1);
        assert_eq!(candidates[0].class_name, "bottle");
        assert_eq!(candidates[0].bbox, [40.0, 40.0, 60.0, 80.0]);
    }

    #[test]
    fn test_decode_transposed_output_and_letterbox() {
        let class_names = vec!["apple".to_string()];
        // [1, anchors, 4 + 1]
        let mut output = Array3::<f32>::zeros((1, 1, 5));
        output[[0, 0, 0]] = 100.0;
        output[[0, 0, 1]] = 100.0;
        output[[0, 0, 2]] = 40.0;
        output[[0, 0, 3]] = 40.0;
        output[[0, 0, 4]] = 0.8;

        let letterbox = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 20.0,
        };
        let candidates =
            decode_yolo_output(output.into_dyn().view(), &class_names, &letterbox, 0.5, (1000, 1000))
                .unwrap();

        assert_eq!(candidates[0].bbox, [160.0, 120.0, 240.0, 200.0]);
    }

    #[test]
    fn test_decode_rejects_mismatched_shape() {
        let class_names = vec!["apple".to_string()];
        let output = Array3::<f32>::zeros((1, 9, 9));
        let letterbox = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };

        assert!(
            decode_yolo_output(output.into_dyn().view(), &class_names, &letterbox, 0.5, (10, 10))
                .is_err()
        );
    }
}
