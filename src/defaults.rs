//! Default configuration constants for pendant.
//!
//! This module provides shared constants used across different configuration types
//! to ensure consistency and eliminate duplication.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech capture and keeps recordings small
/// enough to upload over a flaky connection.
pub const SAMPLE_RATE: u32 = 16000;

/// Recordings are mono.
pub const CHANNELS: u16 = 1;

/// Recordings are 16-bit signed PCM.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Number of samples per voice-detection analysis window.
///
/// 256 samples at 16kHz is 16ms of audio, short enough that detection
/// latency stays well under the debounce interval.
pub const FRAME_SAMPLES: usize = 256;

/// Default RMS threshold for voice detection, in raw i16 amplitude units.
///
/// Tuned against the MEMS microphone this device ships with; quiet rooms
/// measure an RMS around 10-30, conversational speech at arm's length
/// lands in the hundreds.
pub const RMS_THRESHOLD: f32 = 50.0;

/// Multiplier applied to the adaptive noise floor to form a detection
/// threshold. The effective threshold is the larger of
/// `RMS_THRESHOLD` and `noise floor x sensitivity`.
pub const VAD_SENSITIVITY: f32 = 2.0;

/// Lower bound for the adaptive noise floor, in raw amplitude units.
///
/// Keeps a long stretch of near-digital-silence from dragging the floor
/// to zero and turning every breath into a trigger.
pub const NOISE_FLOOR_MIN: f32 = 25.0;

/// Lower edge of the accepted variance band for voice.
///
/// Constant tones (alarms, hum) have high RMS but near-zero variance
/// once the DC offset is removed; they fall below this edge.
pub const VARIANCE_MIN: f32 = 5_000.0;

/// Upper edge of the accepted variance band for voice.
///
/// Impulsive noise (door slams, taps on the case) overshoots this edge.
pub const VARIANCE_MAX: f32 = 100_000.0;

/// Consecutive positive analysis windows required before a detection is
/// reported. Three windows is roughly 50ms of sustained voice.
pub const DEBOUNCE_FRAMES: u32 = 3;

/// Minimum interval between adaptive noise floor updates, in milliseconds.
pub const FLOOR_UPDATE_INTERVAL_MS: u64 = 100;

/// Number of analysis windows averaged during startup calibration.
pub const CALIBRATION_FRAMES: u32 = 30;

/// Safety margin applied to the calibrated ambient level.
pub const CALIBRATION_MARGIN: f32 = 1.2;

/// Default silence duration in milliseconds before a recording is ended.
///
/// 3 seconds allows for natural pauses in speech without prematurely
/// ending the session.
pub const SILENCE_TIMEOUT_MS: u64 = 3_000;

/// Hard cap on a single recording, in milliseconds.
pub const MAX_RECORDING_MS: u64 = 300_000;

/// Sync the sink after this many written samples (one second of audio).
pub const FLUSH_EVERY_SAMPLES: u32 = SAMPLE_RATE;

/// Minimum interval between upload passes, in milliseconds.
///
/// Pending files are not urgent; batching attempts keeps the radio idle
/// between passes.
pub const UPLOAD_CHECK_INTERVAL_MS: u64 = 30_000;

/// Per-file retry ceiling. A file failing this many times is abandoned
/// and reported rather than retried forever.
pub const MAX_UPLOAD_RETRIES: u32 = 3;

/// Maximum files uploaded per pass.
pub const UPLOAD_BATCH: usize = 5;

/// Per-request upload timeout, in milliseconds.
pub const API_TIMEOUT_MS: u64 = 30_000;

/// Default upload endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080/upload";

/// Default device identifier sent with uploads.
pub const DEVICE_ID: &str = "pendant-dev";

/// Subdirectory for recordings awaiting upload.
pub const RECORDINGS_DIR: &str = "recordings";

/// Subdirectory recordings are moved to once uploaded.
pub const UPLOADED_DIR: &str = "uploaded";

/// Free-space watermark in bytes; below this, maintenance starts
/// deleting the oldest already-uploaded recordings.
pub const MIN_FREE_BYTES: u64 = 100 * 1024 * 1024;

/// Maximum deletions per maintenance pass.
pub const CLEANUP_BATCH: usize = 16;

/// Battery percentage below which the LED warns while idle.
pub const LOW_BATTERY_PERCENT: f32 = 10.0;

/// Battery percentage below which new recordings are refused.
pub const CRITICAL_BATTERY_PERCENT: f32 = 5.0;

/// Minimum interval between battery polls, in milliseconds.
pub const BATTERY_POLL_INTERVAL_MS: u64 = 1_000;

/// Scheduler tick interval in milliseconds.
///
/// Matches one analysis window of audio so the listening loop consumes
/// frames at the rate the source produces them.
pub const TICK_INTERVAL_MS: u64 = 16;

/// Cooldown before the scheduler attempts recovery from an error.
pub const ERROR_COOLDOWN_MS: u64 = 15_000;

/// Errors tolerated before recovery is gated (under the default policy).
pub const MAX_ERRORS: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variance_band_is_ordered() {
        assert!(VARIANCE_MIN < VARIANCE_MAX);
    }

    #[test]
    fn battery_thresholds_are_ordered() {
        assert!(CRITICAL_BATTERY_PERCENT < LOW_BATTERY_PERCENT);
    }

    #[test]
    fn analysis_window_fits_tick() {
        let window_ms = FRAME_SAMPLES as u64 * 1_000 / SAMPLE_RATE as u64;
        assert_eq!(window_ms, TICK_INTERVAL_MS);
    }
}
