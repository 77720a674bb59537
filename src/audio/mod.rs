//! Audio sources.
//!
//! The recorder reads one analysis window at a time through the
//! [`AudioSource`] trait. Hardware capture lives on the device; host-side
//! implementations replay WAV files ([`wav_source::WavFileSource`]),
//! produce silence ([`SilenceSource`]), or follow a script
//! ([`MockAudioSource`]).

pub mod wav_source;

pub use wav_source::WavFileSource;

use crate::error::{PendantError, Result};
use std::collections::VecDeque;

/// Trait for audio sources.
///
/// This trait allows swapping implementations (replayed file vs mock vs
/// real microphone on the device build).
pub trait AudioSource: Send {
    /// Start producing audio.
    fn start(&mut self) -> Result<()>;

    /// Stop producing audio.
    fn stop(&mut self) -> Result<()>;

    /// Read up to `max_samples` of 16-bit PCM mono audio.
    ///
    /// A short or empty frame means less audio was buffered, not end of
    /// stream. Samples may include the sentinel values 0, -1 and +1 that
    /// the capture path uses for dropped slots; the detector filters them.
    fn read_frame(&mut self, max_samples: usize) -> Result<Vec<i16>>;
}

/// Source that produces endless digital silence.
///
/// Used when the binary runs without an input file: the recorder sits in
/// its listening state and never triggers.
#[derive(Debug, Clone, Default)]
pub struct SilenceSource {
    started: bool,
}

impl SilenceSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSource for SilenceSource {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn read_frame(&mut self, max_samples: usize) -> Result<Vec<i16>> {
        Ok(vec![0i16; max_samples])
    }
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    queued: VecDeque<Vec<i16>>,
    repeated: Vec<i16>,
    should_fail_start: bool,
    should_fail_stop: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source that produces silence
    pub fn new() -> Self {
        Self {
            is_started: false,
            queued: VecDeque::new(),
            repeated: vec![0i16; 256],
            should_fail_start: false,
            should_fail_stop: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return the same samples on every read
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.repeated = samples;
        self
    }

    /// Queue frames that are consumed in order; once exhausted, reads
    /// fall back to the repeated samples
    pub fn with_frames(mut self, frames: Vec<Vec<i16>>) -> Self {
        self.queued = frames.into();
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }

    /// Frames still waiting to be read
    pub fn queued_frames(&self) -> usize {
        self.queued.len()
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(PendantError::AudioStart {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.should_fail_stop {
            Err(PendantError::AudioStop {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = false;
            Ok(())
        }
    }

    fn read_frame(&mut self, max_samples: usize) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(PendantError::AudioRead {
                message: self.error_message.clone(),
            });
        }
        let mut frame = match self.queued.pop_front() {
            Some(frame) => frame,
            None => self.repeated.clone(),
        };
        frame.truncate(max_samples);
        Ok(frame)
    }
}
