//! Voice activity detection.
//!
//! Classifies short windows of audio as voice or not-voice using RMS
//! energy plus a variance band, debounced over consecutive windows. The
//! microphone reports the sentinel values 0, -1 and +1 for dropped
//! sample slots; those are filtered before any statistic is computed,
//! and a window that is mostly sentinels is inconclusive.

use crate::audio::AudioSource;
use crate::clock::{Clock, SystemClock};
use crate::config::VadConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Returns true for the sample values the capture path uses as
/// dropped-slot markers.
pub fn is_sentinel(sample: i16) -> bool {
    matches!(sample, -1..=1)
}

/// Statistics computed over one analysis window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// DC offset of the valid samples.
    pub mean: f32,
    /// RMS energy of the raw valid samples.
    pub rms: f32,
    /// Variance of the valid samples around their DC offset.
    pub variance: f32,
    /// Samples that survived sentinel filtering.
    pub valid_samples: usize,
}

/// Computes window statistics after sentinel filtering.
///
/// Returns `None` when fewer than half the samples are valid; such a
/// window is inconclusive and must not influence detection state.
pub fn analyze(samples: &[i16]) -> Option<FrameStats> {
    if samples.is_empty() {
        return None;
    }

    let valid: Vec<f64> = samples
        .iter()
        .copied()
        .filter(|&s| !is_sentinel(s))
        .map(f64::from)
        .collect();

    if valid.len() * 2 < samples.len() {
        return None;
    }

    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let energy = valid.iter().map(|s| s * s).sum::<f64>() / n;
    let variance = valid
        .iter()
        .map(|s| {
            let d = s - mean;
            d * d
        })
        .sum::<f64>()
        / n;

    Some(FrameStats {
        mean: mean as f32,
        rms: energy.sqrt() as f32,
        variance: variance as f32,
        valid_samples: valid.len(),
    })
}

/// Voice activity detector.
///
/// One call to [`Vad::observe`] per analysis window; the window is
/// classified, the debounce counter updated, and the adaptive noise
/// floor nudged on its own slower cadence.
pub struct Vad {
    config: VadConfig,
    noise_floor: f32,
    running_average: f32,
    consecutive_hits: u32,
    last_stats: Option<FrameStats>,
    last_floor_update: Instant,
    clock: Arc<dyn Clock>,
}

impl Vad {
    /// Creates a detector using the system clock.
    pub fn new(config: VadConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a detector with an injected clock.
    pub fn with_clock(config: VadConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            noise_floor: config.noise_floor_min,
            running_average: 0.0,
            consecutive_hits: 0,
            last_stats: None,
            last_floor_update: now,
            config,
            clock,
        }
    }

    /// Classifies one window of samples.
    ///
    /// Returns `true` once `debounce_frames` consecutive windows have
    /// individually classified as voice, and keeps returning `true`
    /// while that run continues. An inconclusive window (mostly
    /// sentinels) returns `false` and leaves all state, including the
    /// debounce counter and the noise floor, untouched.
    pub fn observe(&mut self, samples: &[i16]) -> bool {
        let Some(stats) = analyze(samples) else {
            return false;
        };
        self.last_stats = Some(stats);

        self.maybe_update_floor(stats.rms);

        let raw = stats.rms > self.effective_threshold()
            && stats.variance > self.config.variance_min
            && stats.variance < self.config.variance_max;

        if raw {
            self.consecutive_hits = self.consecutive_hits.saturating_add(1);
        } else {
            self.consecutive_hits = 0;
        }

        self.consecutive_hits >= self.config.debounce_frames
    }

    /// The threshold a window's RMS must exceed: the configured value or
    /// the adaptive floor times the sensitivity, whichever is higher.
    pub fn effective_threshold(&self) -> f32 {
        self.config
            .rms_threshold
            .max(self.noise_floor * self.config.sensitivity)
    }

    /// Current adaptive noise floor estimate.
    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    /// Consecutive voice-positive windows so far.
    pub fn consecutive_hits(&self) -> u32 {
        self.consecutive_hits
    }

    /// Statistics of the last conclusive window.
    pub fn last_stats(&self) -> Option<FrameStats> {
        self.last_stats
    }

    /// Clears the debounce run and diagnostics, keeping the learned
    /// noise floor.
    pub fn reset(&mut self) {
        self.consecutive_hits = 0;
        self.last_stats = None;
    }

    /// Measures ambient level over a fixed number of windows and sets
    /// the noise floor to the average with a safety margin.
    ///
    /// The source is assumed silent while this runs. Windows that fail
    /// to read or are mostly sentinels are skipped; if nothing usable is
    /// collected the current floor is kept. Resets the debounce run.
    pub fn calibrate(&mut self, source: &mut dyn AudioSource, frame_samples: usize) {
        let mut levels = Vec::new();

        for _ in 0..self.config.calibration_frames {
            let Ok(frame) = source.read_frame(frame_samples) else {
                continue;
            };
            if let Some(stats) = analyze(&frame) {
                levels.push(stats.rms);
            }
        }

        if !levels.is_empty() {
            let average = levels.iter().sum::<f32>() / levels.len() as f32;
            self.noise_floor =
                (average * self.config.calibration_margin).max(self.config.noise_floor_min);
        }

        self.running_average = self.noise_floor;
        self.consecutive_hits = 0;
        self.last_stats = None;
        self.last_floor_update = self.clock.now();
    }

    fn maybe_update_floor(&mut self, rms: f32) {
        if !self.config.adaptive_floor {
            return;
        }
        let now = self.clock.now();
        if now.duration_since(self.last_floor_update)
            < Duration::from_millis(self.config.floor_update_interval_ms)
        {
            return;
        }

        self.running_average = self.running_average * 0.95 + rms * 0.05;

        // Loud transients must never drag the floor upward
        if rms < self.noise_floor * 1.5 {
            self.noise_floor = self.noise_floor * 0.99 + rms * 0.01;
        }

        self.noise_floor = self.noise_floor.max(self.config.noise_floor_min);
        self.last_floor_update = now;
    }
}
