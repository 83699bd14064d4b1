//! Text recognition on packaging crops
//!
//! Runs the Tesseract command line tool on preprocessed crops. When Tesseract
//! is not installed the reader stays degraded and hands out mock label text.

use anyhow::{Context, Result};
use image::{GrayImage, ImageFormat, RgbImage};
use rand::Rng;
use std::cell::Cell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::ocr_preprocess::prepare_for_recognition;
use crate::config::OcrConfig;

/// Label text served while the engine is unavailable
pub const MOCK_TEXTS: [&str; 6] = ["AMUL MILK", "BREAD", "NOODLES", "YOGURT", "CHEESE", "BUTTER"];

/// Confidence reported for mock text
const MOCK_CONFIDENCE: f32 = 0.75;

/// Poll interval while waiting on the tesseract process
const WAIT_POLL: Duration = Duration::from_millis(10);

thread_local! {
    // A request runs on a single blocking thread, so its reads stay consecutive
    static MOCK_CURSOR: Cell<usize> = Cell::new(rand::thread_rng().gen_range(0..MOCK_TEXTS.len()));
}

const CHAR_WHITELIST: &str =
    "tessedit_char_whitelist=ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789 ";

/// Single word reported by the engine, confidence on a 0 - 100 scale
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedToken {
    pub text: String,
    pub confidence: f32,
}

/// Text recognition engine boundary
pub trait TextRecognizer: Send + Sync {
    /// Plain text for a whole crop
    fn recognize(&self, image: &GrayImage) -> Result<String>;

    /// Word-level output with confidences
    fn recognize_tokens(&self, image: &GrayImage) -> Result<Vec<RecognizedToken>>;
}

/// Tesseract driven through its CLI
pub struct TesseractCli {
    executable: PathBuf,
    language: String,
    timeout: Duration,
}

impl TesseractCli {
    pub fn new(executable: PathBuf, language: &str, timeout: Duration) -> Self {
        Self {
            executable,
            language: language.to_string(),
            timeout,
        }
    }

    /// Probe the executable, returning its version line
    pub fn version(&self) -> Result<String> {
        let output = run_with_deadline(Command::new(&self.executable).arg("--version"), self.timeout)
            .with_context(|| format!("Failed to run {:?}", self.executable))?;

        if !output.status.success() {
            anyhow::bail!("{:?} --version exited with {}", self.executable, output.status);
        }

        // Older releases print the banner on stderr
        let banner = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&banner)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    fn run(&self, image: &GrayImage, extra_args: &[&str]) -> Result<String> {
        let input = tempfile::Builder::new()
            .prefix("fridgepal-ocr-")
            .suffix(".png")
            .tempfile()
            .context("Failed to create temp file for OCR")?;
        image
            .save_with_format(input.path(), ImageFormat::Png)
            .context("Failed to write temp image for OCR")?;

        let mut command = Command::new(&self.executable);
        command
            .arg(input.path())
            .arg("stdout")
            .args(["-l", &self.language])
            .args(extra_args);
        let output = run_with_deadline(&mut command, self.timeout)
            .with_context(|| format!("Failed to run {:?}", self.executable))?;

        if !output.status.success() {
            anyhow::bail!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Captured output of a finished child process
#[derive(Debug)]
struct ProcessOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Run a command to completion, killing it once `timeout` has passed.
/// Output goes to temp files so a chatty child cannot block on a full pipe.
fn run_with_deadline(command: &mut Command, timeout: Duration) -> Result<ProcessOutput> {
    let mut stdout = tempfile::tempfile().context("Failed to create stdout capture")?;
    let mut stderr = tempfile::tempfile().context("Failed to create stderr capture")?;

    let mut child = command
        .stdout(stdout.try_clone()?)
        .stderr(stderr.try_clone()?)
        .spawn()?;

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            if let Err(e) = child.kill() {
                warn!("Failed to kill timed out process: {}", e);
            }
            // Reap the killed child
            let _ = child.wait();
            anyhow::bail!("process did not finish within {:?}", timeout);
        }
        std::thread::sleep(WAIT_POLL);
    };

    Ok(ProcessOutput {
        status,
        stdout: read_capture(&mut stdout)?,
        stderr: read_capture(&mut stderr)?,
    })
}

fn read_capture(file: &mut File) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, image: &GrayImage) -> Result<String> {
        self.run(image, &["--oem", "3", "--psm", "6", "-c", CHAR_WHITELIST])
    }

    fn recognize_tokens(&self, image: &GrayImage) -> Result<Vec<RecognizedToken>> {
        let tsv = self.run(image, &["tsv"])?;
        Ok(parse_tsv_tokens(&tsv))
    }
}

/// Parse Tesseract TSV output into word tokens. Rows without a numeric
/// confidence (the header, malformed lines) are skipped.
pub fn parse_tsv_tokens(tsv: &str) -> Vec<RecognizedToken> {
    tsv.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 {
                return None;
            }
            let confidence = cols[10].trim().parse::<f32>().ok()?;
            Some(RecognizedToken {
                text: cols[11].to_string(),
                confidence,
            })
        })
        .collect()
}

/// Collapse whitespace, keep alphanumerics, spaces, periods and hyphens,
/// uppercase. Anything shorter than two characters is treated as noise.
pub fn clean_text(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned: String = collapsed
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '-'))
        .collect::<String>()
        .to_uppercase();
    let cleaned = cleaned.trim();

    if cleaned.chars().count() < 2 {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Result of the token-level recognition pass
#[derive(Debug, Clone, PartialEq)]
pub struct TextWithConfidence {
    pub text: Option<String>,
    /// Mean kept-token confidence in [0, 1]
    pub confidence: f32,
}

impl TextWithConfidence {
    fn empty() -> Self {
        Self {
            text: None,
            confidence: 0.0,
        }
    }
}

enum ReaderState {
    Ready(Box<dyn TextRecognizer>),
    Degraded { reason: String },
}

/// Text reader adapter
pub struct TextReader {
    state: ReaderState,
    token_confidence_threshold: f32,
}

impl TextReader {
    /// Probe Tesseract and build the reader, degrading if it cannot run
    pub fn load(config: &OcrConfig) -> Self {
        let executable = config
            .tesseract_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("tesseract"));
        let cli = TesseractCli::new(
            executable,
            &config.language,
            Duration::from_secs(config.timeout_secs),
        );

        match cli.version() {
            Ok(version) => {
                info!("Tesseract OCR initialized successfully ({})", version);
                Self::with_recognizer(Box::new(cli), config.token_confidence_threshold)
            }
            Err(e) => {
                warn!("Tesseract not available: {:#}. OCR will use mock data.", e);
                Self::degraded(&format!("{:#}", e))
            }
        }
    }

    pub fn with_recognizer(recognizer: Box<dyn TextRecognizer>, token_confidence_threshold: f32) -> Self {
        Self {
            state: ReaderState::Ready(recognizer),
            token_confidence_threshold,
        }
    }

    pub fn degraded(reason: &str) -> Self {
        Self {
            state: ReaderState::Degraded {
                reason: reason.to_string(),
            },
            token_confidence_threshold: OcrConfig::default().token_confidence_threshold,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ReaderState::Ready(_))
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match &self.state {
            ReaderState::Ready(_) => None,
            ReaderState::Degraded { reason } => Some(reason),
        }
    }

    /// Fast pass: whole-crop recognition restricted to alphanumerics
    pub fn extract_text(&self, image: &RgbImage) -> Option<String> {
        if image.width() == 0 || image.height() == 0 {
            return None;
        }

        let recognizer = match &self.state {
            ReaderState::Ready(recognizer) => recognizer,
            ReaderState::Degraded { .. } => return Some(mock_text()),
        };

        let processed = prepare_for_recognition(image);
        match recognizer.recognize(&processed) {
            Ok(raw) => {
                let text = clean_text(&raw);
                if let Some(text) = &text {
                    info!("OCR extracted: {}", text);
                }
                text
            }
            Err(e) => {
                error!("OCR extraction failed: {:#}", e);
                None
            }
        }
    }

    /// Slow pass: keep confident tokens only and report their mean confidence
    pub fn extract_text_with_confidence(&self, image: &RgbImage) -> TextWithConfidence {
        let recognizer = match &self.state {
            ReaderState::Ready(recognizer) => recognizer,
            ReaderState::Degraded { .. } => {
                return TextWithConfidence {
                    text: Some(mock_text()),
                    confidence: MOCK_CONFIDENCE,
                }
            }
        };

        if image.width() == 0 || image.height() == 0 {
            return TextWithConfidence::empty();
        }

        let processed = prepare_for_recognition(image);
        let tokens = match recognizer.recognize_tokens(&processed) {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("OCR with confidence failed: {:#}", e);
                return TextWithConfidence::empty();
            }
        };

        let kept: Vec<(&str, f32)> = tokens
            .iter()
            .filter(|t| t.confidence.trunc() > self.token_confidence_threshold)
            .map(|t| (t.text.trim(), t.confidence.trunc()))
            .filter(|(text, _)| !text.is_empty())
            .collect();

        if kept.is_empty() {
            debug!("No tokens above confidence {}", self.token_confidence_threshold);
            return TextWithConfidence::empty();
        }

        let combined = kept.iter().map(|(text, _)| *text).collect::<Vec<_>>().join(" ");
        let mean = kept.iter().map(|(_, conf)| conf).sum::<f32>() / kept.len() as f32 / 100.0;

        TextWithConfidence {
            text: clean_text(&combined),
            confidence: (mean * 100.0).round() / 100.0,
        }
    }
}

/// Next mock entry for this thread; consecutive calls never repeat
fn mock_text() -> String {
    let index = MOCK_CURSOR.with(|cursor| {
        let index = cursor.get();
        cursor.set((index + 1) % MOCK_TEXTS.len());
        index
    });
    MOCK_TEXTS[index].to_string()
}

/// Two-pass read of a container crop: the fast pass first, then the
/// token-level pass if the fast one found nothing
pub fn read_container_text(reader: &TextReader, crop: &RgbImage) -> Option<String> {
    reader
        .extract_text(crop)
        .or_else(|| reader.extract_text_with_confidence(crop).text)
}
