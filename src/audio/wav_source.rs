//! WAV file audio source for replayed-capture runs.

use crate::audio::AudioSource;
use crate::error::{PendantError, Result};
use std::io::Read;
use std::path::Path;

/// Replays a WAV file one frame at a time.
///
/// Input is downmixed to mono and resampled to the recorder's rate up
/// front, so `read_frame` is a plain slice copy.
pub struct WavFileSource {
    samples: Vec<i16>,
    position: usize,
}

impl WavFileSource {
    pub fn from_path(path: &Path, target_rate: u32) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(Box::new(file), target_rate)
    }

    pub fn from_reader(reader: Box<dyn Read + Send>, target_rate: u32) -> Result<Self> {
        let mut wav = hound::WavReader::new(reader).map_err(|e| PendantError::AudioUnsupported {
            message: format!("Failed to parse WAV file: {}", e),
        })?;
        let spec = wav.spec();

        let raw: Vec<i16> = wav
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| PendantError::AudioUnsupported {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        // Average interleaved channel groups down to one channel.
        let channels = usize::from(spec.channels).max(1);
        let mono: Vec<i16> = if channels == 1 {
            raw
        } else {
            raw.chunks_exact(channels)
                .map(|group| {
                    let sum: i32 = group.iter().copied().map(i32::from).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        Ok(Self {
            samples: resample(&mono, spec.sample_rate, target_rate),
            position: 0,
        })
    }

    /// Total number of samples this source will produce.
    pub fn len_samples(&self) -> usize {
        self.samples.len()
    }
}

impl AudioSource for WavFileSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_frame(&mut self, max_samples: usize) -> Result<Vec<i16>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }
        let end = (self.position + max_samples).min(self.samples.len());
        let frame = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(frame)
    }
}

/// Linear-interpolation resampler.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let step = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / step).ceil() as usize;

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * step;
        let idx = pos as usize;
        let frac = pos - idx as f64;
        let a = f64::from(samples[idx]);
        let b = samples.get(idx + 1).map_or(a, |&s| f64::from(s));
        out.push((a + (b - a) * frac) as i16);
    }
    out
}
