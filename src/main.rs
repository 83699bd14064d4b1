//! FridgePal - fridge photo recognition backend
//!
//! Detects produce and packaged food in a photo, reads packaging labels and
//! serves the results over HTTP to the mobile app.

mod analysis;
mod config;
mod pipeline;
mod server;
mod storage;
mod vision;

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::pipeline::FoodPipeline;
use crate::vision::ModelManager;

/// FridgePal - food recognition API
#[derive(Parser, Debug, Default)]
#[command(name = "fridgepal")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Detects food in fridge photos and reads packaging labels")]
struct Args {
    /// Configuration file (defaults to config.toml in the platform config directory)
    #[arg(short, long, env = "FRIDGEPAL_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Bind port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Detector ONNX model file
    #[arg(long = "model", env = "YOLO_MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// Minimum detection confidence (0.0 - 1.0)
    #[arg(long, env = "DETECTION_CONFIDENCE")]
    detection_confidence: Option<f32>,

    /// Path to the tesseract executable
    #[arg(long, env = "TESSERACT_PATH")]
    tesseract_path: Option<PathBuf>,

    /// Minimum per-word OCR confidence (0.0 - 1.0)
    #[arg(long, env = "OCR_CONFIDENCE")]
    ocr_confidence: Option<f32>,

    /// Largest side of annotated previews
    #[arg(long, env = "MAX_IMAGE_SIZE")]
    max_image_size: Option<u32>,

    /// JPEG quality of annotated previews
    #[arg(long, env = "JPEG_QUALITY")]
    jpeg_quality: Option<u8>,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    /// Command line and environment values win over the config file
    fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(path) = &self.model_path {
            config.detection.model_path = path.clone();
        }
        if let Some(confidence) = self.detection_confidence {
            config.detection.confidence_threshold = confidence;
        }
        if let Some(path) = &self.tesseract_path {
            config.ocr.tesseract_path = Some(path.clone());
        }
        if let Some(confidence) = self.ocr_confidence {
            // Tesseract reports word confidence on a 0 - 100 scale
            config.ocr.token_confidence_threshold = confidence * 100.0;
        }
        if let Some(size) = self.max_image_size {
            config.image.max_image_size = size;
        }
        if let Some(quality) = self.jpeg_quality {
            config.image.jpeg_quality = quality.clamp(1, 100);
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.to_lowercase();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, source) = load_or_create_config(args.config.as_deref())?;
    args.apply(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("FridgePal backend starting...");
    info!("{}", source);

    let model_path = prepare_model(&config).await;

    // Loading probes tesseract and builds the ONNX session; keep it off the runtime threads
    let pipeline = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || FoodPipeline::load(&config, &model_path)).await?
    };

    server::run_server(&config.server, Arc::new(pipeline)).await?;

    info!("FridgePal shutdown complete");
    Ok(())
}

/// Load configuration from `--config`, then the platform config directory.
/// A default config file is written there on first run.
fn load_or_create_config(explicit: Option<&Path>) -> Result<(AppConfig, String)> {
    if let Some(path) = explicit {
        let config = config::load_config(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {:?}: {}", path, e))?;
        return Ok((config, format!("Loaded configuration from {:?}", path)));
    }

    let Ok(config_dir) = storage::get_config_dir() else {
        return Ok((AppConfig::default(), "Using default configuration".to_string()));
    };
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        match config::load_config(&config_path) {
            Ok(config) => {
                return Ok((config, format!("Loaded configuration from {:?}", config_path)))
            }
            Err(e) => {
                return Ok((
                    AppConfig::default(),
                    format!("Ignoring unreadable config {:?} ({}), using defaults", config_path, e),
                ))
            }
        }
    }

    let config = AppConfig::default();
    let source = match config::save_config(&config, &config_path) {
        Ok(()) => format!("Wrote default configuration to {:?}", config_path),
        Err(e) => format!("Using default configuration (could not write {:?}: {})", config_path, e),
    };
    Ok((config, source))
}

/// Resolve the detector weights, downloading them when a source is configured
async fn prepare_model(config: &AppConfig) -> PathBuf {
    let detection = &config.detection;

    let manager = match ModelManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            warn!("Model directory unavailable: {}", e);
            return detection.model_path.clone();
        }
    };
    info!("Models directory: {:?}", manager.models_dir());

    match manager
        .ensure_model(&detection.model_path, detection.model_url.as_deref())
        .await
    {
        Ok(path) => path,
        Err(e) => {
            warn!("Detector model not prepared: {:#}", e);
            manager.resolve(&detection.model_path)
        }
    }
}
