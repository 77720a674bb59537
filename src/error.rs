//! Error types for pendant.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PendantError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio source errors
    #[error("Audio source failed to start: {message}")]
    AudioStart { message: String },

    #[error("Audio read failed: {message}")]
    AudioRead { message: String },

    #[error("Audio source failed to stop: {message}")]
    AudioStop { message: String },

    #[error("Unsupported audio input: {message}")]
    AudioUnsupported { message: String },

    // Recording session errors
    #[error("A recording session is already active")]
    SessionActive,

    #[error("Recording session is already closed")]
    SessionClosed,

    #[error("Recording sink unavailable at {path}: {message}")]
    SinkUnavailable { path: String, message: String },

    #[error("Write to {path} failed: {message}")]
    WriteFailed { path: String, message: String },

    #[error("Header update for {path} failed: {message}")]
    HeaderUpdateFailed { path: String, message: String },

    // WAV format errors
    #[error("Invalid WAV header: {message}")]
    InvalidHeader { message: String },

    // Storage errors
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    // Upload errors
    #[error("Network connectivity lost")]
    ConnectivityLost,

    #[error("Upload rejected with status {status}: {message}")]
    UploadRejected { status: u16, message: String },

    #[error("Upload transport error: {message}")]
    UploadTransport { message: String },

    #[error("Failed to mark {path} as uploaded: {message}")]
    MarkFailed { path: String, message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, PendantError>;

/// One-byte diagnostic codes reported through the status LED and events.
///
/// The numbering is part of the device's field-diagnosis procedure and
/// must stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    StorageInit,
    AudioInit,
    Network,
    Recording,
    Upload,
    LowBattery,
    StorageWrite,
}

impl Fault {
    /// Wire/diagnostic code for this fault.
    pub fn code(&self) -> u8 {
        match self {
            Fault::StorageInit => 0x01,
            Fault::AudioInit => 0x02,
            Fault::Network => 0x03,
            Fault::Recording => 0x04,
            Fault::Upload => 0x05,
            Fault::LowBattery => 0x06,
            Fault::StorageWrite => 0x07,
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Fault::StorageInit => "storage initialization failed",
            Fault::AudioInit => "audio initialization failed",
            Fault::Network => "network failure",
            Fault::Recording => "recording failed",
            Fault::Upload => "upload failed",
            Fault::LowBattery => "battery low",
            Fault::StorageWrite => "storage write failed",
        };
        write!(f, "{} (0x{:02X})", label, self.code())
    }
}
