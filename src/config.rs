use crate::defaults;
use crate::error::{PendantError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub recording: RecordingConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub power: PowerConfig,
    pub error_policy: ErrorPolicyConfig,
}

/// Audio format and loop cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_samples: usize,
    pub tick_interval_ms: u64,
}

/// Voice detection tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadConfig {
    pub rms_threshold: f32,
    pub sensitivity: f32,
    pub noise_floor_min: f32,
    pub variance_min: f32,
    pub variance_max: f32,
    pub debounce_frames: u32,
    pub adaptive_floor: bool,
    pub floor_update_interval_ms: u64,
    pub calibration_frames: u32,
    pub calibration_margin: f32,
}

/// Recording session limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordingConfig {
    pub silence_timeout_ms: u64,
    pub max_duration_ms: u64,
    pub flush_every_samples: u32,
}

/// Upload endpoint and retry policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    pub endpoint: String,
    pub device_id: String,
    pub check_interval_ms: u64,
    pub max_retries: u32,
    pub batch_size: usize,
    pub timeout_ms: u64,
}

/// On-disk layout and space management
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub min_free_bytes: u64,
    pub cleanup_batch: usize,
}

/// Battery thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PowerConfig {
    pub low_battery_percent: f32,
    pub critical_battery_percent: f32,
    pub poll_interval_ms: u64,
}

/// Error-state cooldown and recovery gating
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ErrorPolicyConfig {
    pub cooldown_ms: u64,
    pub max_errors: u32,
    pub recovery: RecoveryPolicy,
}

/// What the scheduler does once the error count passes `max_errors`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Keep attempting recovery after every cooldown, forever.
    AlwaysRecover,
    /// Stop recovering past the ceiling; stay in the error state until
    /// restarted.
    GateOnErrorCount,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_samples: defaults::FRAME_SAMPLES,
            tick_interval_ms: defaults::TICK_INTERVAL_MS,
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            rms_threshold: defaults::RMS_THRESHOLD,
            sensitivity: defaults::VAD_SENSITIVITY,
            noise_floor_min: defaults::NOISE_FLOOR_MIN,
            variance_min: defaults::VARIANCE_MIN,
            variance_max: defaults::VARIANCE_MAX,
            debounce_frames: defaults::DEBOUNCE_FRAMES,
            adaptive_floor: true,
            floor_update_interval_ms: defaults::FLOOR_UPDATE_INTERVAL_MS,
            calibration_frames: defaults::CALIBRATION_FRAMES,
            calibration_margin: defaults::CALIBRATION_MARGIN,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: defaults::SILENCE_TIMEOUT_MS,
            max_duration_ms: defaults::MAX_RECORDING_MS,
            flush_every_samples: defaults::FLUSH_EVERY_SAMPLES,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::DEFAULT_ENDPOINT.to_string(),
            device_id: defaults::DEVICE_ID.to_string(),
            check_interval_ms: defaults::UPLOAD_CHECK_INTERVAL_MS,
            max_retries: defaults::MAX_UPLOAD_RETRIES,
            batch_size: defaults::UPLOAD_BATCH,
            timeout_ms: defaults::API_TIMEOUT_MS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("pendant-data"),
            min_free_bytes: defaults::MIN_FREE_BYTES,
            cleanup_batch: defaults::CLEANUP_BATCH,
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            low_battery_percent: defaults::LOW_BATTERY_PERCENT,
            critical_battery_percent: defaults::CRITICAL_BATTERY_PERCENT,
            poll_interval_ms: defaults::BATTERY_POLL_INTERVAL_MS,
        }
    }
}

impl Default for ErrorPolicyConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: defaults::ERROR_COOLDOWN_MS,
            max_errors: defaults::MAX_ERRORS,
            recovery: RecoveryPolicy::GateOnErrorCount,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Self::default()
                } else {
                    // Re-panic on invalid TOML or other errors
                    panic!("Failed to load config from {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PENDANT_ENDPOINT → upload.endpoint
    /// - PENDANT_DEVICE_ID → upload.device_id
    /// - PENDANT_DATA_DIR → storage.data_dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("PENDANT_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.upload.endpoint = endpoint;
        }

        if let Ok(device_id) = std::env::var("PENDANT_DEVICE_ID")
            && !device_id.is_empty()
        {
            self.upload.device_id = device_id;
        }

        if let Ok(data_dir) = std::env::var("PENDANT_DATA_DIR")
            && !data_dir.is_empty()
        {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        self
    }

    /// Reject values the recorder cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(PendantError::ConfigInvalidValue {
                key: "audio.sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.audio.frame_samples == 0 {
            return Err(PendantError::ConfigInvalidValue {
                key: "audio.frame_samples".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.vad.variance_min >= self.vad.variance_max {
            return Err(PendantError::ConfigInvalidValue {
                key: "vad.variance_min".to_string(),
                message: "must be below vad.variance_max".to_string(),
            });
        }
        if self.vad.debounce_frames == 0 {
            return Err(PendantError::ConfigInvalidValue {
                key: "vad.debounce_frames".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.upload.batch_size == 0 {
            return Err(PendantError::ConfigInvalidValue {
                key: "upload.batch_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.power.critical_battery_percent > self.power.low_battery_percent {
            return Err(PendantError::ConfigInvalidValue {
                key: "power.critical_battery_percent".to_string(),
                message: "must not exceed power.low_battery_percent".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/pendant/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .expect("Could not determine config directory")
            .join("pendant")
            .join("config.toml")
    }
}
