//! Application Configuration
//!
//! Server, model and image settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Object detector settings
    pub detection: DetectionConfig,
    /// Text recognition settings
    pub ocr: OcrConfig,
    /// Image handling settings
    pub image: ImageConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Upper bound on a single detect request, in seconds
    pub request_timeout_secs: u64,
    /// Largest accepted detect request body, in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 30,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Object detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// ONNX model file. Relative paths are resolved against the models directory.
    pub model_path: PathBuf,
    /// Optional download source used when the model file is missing
    pub model_url: Option<String>,
    /// Minimum detection confidence (0.0 - 1.0)
    pub confidence_threshold: f32,
    /// Maximum detections kept after NMS
    pub max_detections: usize,
    /// IoU threshold for non-maximum suppression
    pub iou_threshold: f32,
    /// Square model input size in pixels
    pub input_size: u32,
    /// Class names in model output order (defaults to COCO)
    pub class_names: Option<Vec<String>>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("yolov8n.onnx"),
            model_url: None,
            confidence_threshold: 0.5,
            max_detections: 50,
            iou_threshold: 0.4,
            input_size: 640,
            class_names: None,
        }
    }
}

/// Text recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Path to the tesseract executable (looked up on PATH when unset)
    pub tesseract_path: Option<PathBuf>,
    /// Tesseract language pack
    pub language: String,
    /// Per-token confidence cutoff on tesseract's 0 - 100 scale
    pub token_confidence_threshold: f32,
    /// Tesseract runs longer than this are killed, in seconds
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_path: None,
            language: "eng".to_string(),
            token_confidence_threshold: 60.0,
            timeout_secs: 10,
        }
    }
}

/// Image handling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Largest dimension of annotated previews
    pub max_image_size: u32,
    /// JPEG quality for encoded previews (1 - 100)
    pub jpeg_quality: u8,
    /// Extra pixels around container boxes before text recognition
    pub crop_padding: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_image_size: 1024,
            jpeg_quality: 90,
            crop_padding: 15,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.server.max_body_bytes, 32 * 1024 * 1024);

        assert_eq!(config.detection.model_path, PathBuf::from("yolov8n.onnx"));
        assert!(config.detection.model_url.is_none());
        assert!((config.detection.confidence_threshold - 0.5).abs() < 0.001);
        assert_eq!(config.detection.max_detections, 50);
        assert!((config.detection.iou_threshold - 0.4).abs() < 0.001);
        assert_eq!(config.detection.input_size, 640);

        assert!(config.ocr.tesseract_path.is_none());
        assert_eq!(config.ocr.language, "eng");
        assert!((config.ocr.token_confidence_threshold - 60.0).abs() < 0.001);
        assert_eq!(config.ocr.timeout_secs, 10);

        assert_eq!(config.image.max_image_size, 1024);
        assert_eq!(config.image.jpeg_quality, 90);
        assert_eq!(config.image.crop_padding, 15);

        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.server.port = 9090;
        config.detection.model_url = Some("http://localhost/model.onnx".to_string());
        config.ocr.tesseract_path = Some(PathBuf::from("/usr/bin/tesseract"));

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.server.port, 9090);
        assert_eq!(parsed.detection.model_url, config.detection.model_url);
        assert_eq!(parsed.ocr.tesseract_path, config.ocr.tesseract_path);
        assert_eq!(parsed.image.crop_padding, config.image.crop_padding);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig = toml::from_str("[server]\nport = 8080\n").unwrap();

        assert_eq!(parsed.server.port, 8080);
        assert_eq!(parsed.server.host, "0.0.0.0");
        assert_eq!(parsed.detection.max_detections, 50);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.detection.confidence_threshold = 0.35;

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert!((loaded.detection.confidence_threshold - 0.35).abs() < 0.001);
        assert_eq!(loaded.server.port, config.server.port);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
