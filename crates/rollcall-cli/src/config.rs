use anyhow::{bail, Context, Result};
use clap::Args;
use rollcall_core::attendance::DEFAULT_QUIT_POLL;
use rollcall_core::classifier::DEFAULT_MATCH_THRESHOLD;
use rollcall_core::mismatch::DEFAULT_MISMATCH_DIR;
use rollcall_core::session::{DEFAULT_DETECTION_GRACE, DEFAULT_NO_FACE_TIMEOUT};
use rollcall_core::{LogWriter, SessionOptions, SessionTiming};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
const EMBEDDER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Optional TOML config file. Every key may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub camera_device: Option<String>,
    pub known_faces_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub mismatch_dir: Option<PathBuf>,
    pub match_threshold: Option<f32>,
    pub detection_grace_secs: Option<f64>,
    pub no_face_timeout_secs: Option<f64>,
    pub quit_poll_ms: Option<u64>,
    pub warmup_frames: Option<usize>,
    pub preview: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }
}

/// Command-line settings shared by subcommands. Flags override the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct Settings {
    /// TOML config file supplying defaults
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// V4L2 camera device
    #[arg(long, value_name = "PATH")]
    pub device: Option<String>,
    /// Directory of enrollment images (name.jpg / name.png)
    #[arg(long, value_name = "DIR")]
    pub known_faces: Option<PathBuf>,
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, value_name = "DIR")]
    pub models: Option<PathBuf>,
    /// Directory for the attendance CSV
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
    /// Directory for crops of unmatched faces
    #[arg(long, value_name = "DIR")]
    pub mismatch_dir: Option<PathBuf>,
    /// Maximum embedding distance for a match
    #[arg(long)]
    pub threshold: Option<f32>,
    /// Seconds to keep running after the first detection
    #[arg(long, value_name = "SECS")]
    pub grace_secs: Option<f64>,
    /// Seconds to wait for any face before logging "no-face"
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<f64>,
    /// Write the annotated frame to this image file on every iteration
    #[arg(long, value_name = "FILE")]
    pub preview: Option<PathBuf>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub camera_device: String,
    pub known_faces_dir: PathBuf,
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
    pub mismatch_dir: PathBuf,
    pub match_threshold: f32,
    pub timing: SessionTiming,
    pub quit_poll: Duration,
    /// Frames discarded after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
    pub preview: Option<PathBuf>,
}

impl Config {
    /// Read the config file named by `settings` (if any) and apply the flags on top.
    pub fn load(settings: &Settings) -> Result<Self> {
        let file = match &settings.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, settings)
    }

    pub fn resolve(file: FileConfig, settings: &Settings) -> Result<Self> {
        let match_threshold = settings
            .threshold
            .or(file.match_threshold)
            .unwrap_or(DEFAULT_MATCH_THRESHOLD);
        if !match_threshold.is_finite() || match_threshold <= 0.0 {
            bail!("match threshold must be a positive number, got {match_threshold}");
        }

        let timing = SessionTiming {
            detection_grace: secs(
                "detection grace",
                settings.grace_secs.or(file.detection_grace_secs),
                DEFAULT_DETECTION_GRACE,
            )?,
            no_face_timeout: secs(
                "no-face timeout",
                settings.timeout_secs.or(file.no_face_timeout_secs),
                DEFAULT_NO_FACE_TIMEOUT,
            )?,
        };

        Ok(Self {
            camera_device: settings
                .device
                .clone()
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            known_faces_dir: settings
                .known_faces
                .clone()
                .or(file.known_faces_dir)
                .unwrap_or_else(|| PathBuf::from("known_faces")),
            model_dir: settings
                .models
                .clone()
                .or(file.model_dir)
                .unwrap_or_else(|| PathBuf::from("models")),
            output_dir: settings
                .output_dir
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            mismatch_dir: settings
                .mismatch_dir
                .clone()
                .or(file.mismatch_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MISMATCH_DIR)),
            match_threshold,
            timing,
            quit_poll: file.quit_poll_ms.map(Duration::from_millis).unwrap_or(DEFAULT_QUIT_POLL),
            warmup_frames: file.warmup_frames.unwrap_or(4),
            preview: settings.preview.clone().or(file.preview),
        })
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }

    /// Path to the ArcFace embedding model.
    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(EMBEDDER_MODEL_FILE)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            timing: self.timing,
            quit_poll: self.quit_poll,
            mismatch_dir: self.mismatch_dir.clone(),
            log_writer: LogWriter::new(&self.output_dir),
        }
    }
}

fn secs(what: &str, value: Option<f64>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(v) => Duration::try_from_secs_f64(v)
            .with_context(|| format!("{what} must be a non-negative number of seconds, got {v}")),
    }
}
