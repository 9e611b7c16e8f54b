use crate::types::Thresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Region cut out of every camera frame before it is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CropRegion {
    fn default() -> Self {
        Self {
            x: 200,
            y: 120,
            width: 250,
            height: 250,
        }
    }
}

/// Shared configuration for the daemon and the CLI.
///
/// Resolved from defaults, then an optional TOML file, then `FACEID_*`
/// environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for all persisted state.
    pub data_dir: PathBuf,
    /// Gallery directory (default: `<data_dir>/verification_images`).
    pub gallery_dir: Option<PathBuf>,
    /// Probe file (default: `<data_dir>/input_image/input_image.jpg`).
    pub probe_path: Option<PathBuf>,
    /// Protected-application registry (default: `<data_dir>/protected_data.json`).
    pub registry_path: Option<PathBuf>,
    /// Credentials file (default: `<data_dir>/data.json`).
    pub credentials_path: Option<PathBuf>,
    /// Siamese ONNX model (default: `<data_dir>/models/siamese.onnx`).
    pub model_path: Option<PathBuf>,
    /// V4L2 device path.
    pub camera_device: String,
    pub crop: CropRegion,
    pub thresholds: Thresholds,
    /// Frames kept by the ID capture ring buffer.
    pub gallery_capacity: usize,
    /// Upper bound on one verification attempt, model load included.
    pub verify_timeout_secs: u64,
    /// Interval between process list scans.
    pub poll_interval_ms: u64,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Oldest camera frame the daemon will still verify against.
    pub max_frame_age_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            data_dir,
            model_path: None,
            gallery_dir: None,
            probe_path: None,
            registry_path: None,
            credentials_path: None,
            camera_device: "/dev/video0".to_string(),
            crop: CropRegion::default(),
            thresholds: Thresholds::default(),
            gallery_capacity: crate::ring::DEFAULT_CAPACITY,
            verify_timeout_secs: 30,
            poll_interval_ms: 500,
            warmup_frames: 4,
            max_frame_age_ms: 2000,
        }
    }
}

impl Config {
    /// Load the effective configuration.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Apply `FACEID_*` overrides. Unparseable values keep the current value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FACEID_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("FACEID_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(path));
        }
        if let Some(dev) = lookup("FACEID_CAMERA_DEVICE") {
            self.camera_device = dev;
        }
        self.thresholds.detection =
            parsed(&lookup, "FACEID_DETECTION_THRESHOLD", self.thresholds.detection);
        self.thresholds.verification = parsed(
            &lookup,
            "FACEID_VERIFICATION_THRESHOLD",
            self.thresholds.verification,
        );
        self.verify_timeout_secs =
            parsed(&lookup, "FACEID_VERIFY_TIMEOUT_SECS", self.verify_timeout_secs);
        self.poll_interval_ms = parsed(&lookup, "FACEID_POLL_INTERVAL_MS", self.poll_interval_ms);
        self.warmup_frames = parsed(&lookup, "FACEID_WARMUP_FRAMES", self.warmup_frames);
        self.max_frame_age_ms = parsed(&lookup, "FACEID_MAX_FRAME_AGE_MS", self.max_frame_age_ms);
    }

    pub fn gallery_dir(&self) -> PathBuf {
        self.gallery_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("verification_images"))
    }

    pub fn probe_path(&self) -> PathBuf {
        self.probe_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("input_image").join("input_image.jpg"))
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("protected_data.json"))
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models").join("siamese.onnx"))
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("data.json"))
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    current: T,
) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(current)
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceid")
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FACEID_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;
    Some(base.join("faceid").join("config.toml"))
}
