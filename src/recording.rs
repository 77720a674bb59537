//! WAV recording sessions.
//!
//! A session owns one open sink. It writes a placeholder header up
//! front, appends filtered PCM as frames arrive, and patches the real
//! sizes into the header when it finishes. Deciding when to stop is the
//! scheduler's job; the session only records facts.

use crate::defaults;
use crate::error::{PendantError, Result};
use crate::storage::{SinkFile, Storage};
use crate::vad::is_sentinel;
use crate::wav::WavHeader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Facts about a recording whose session has closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedRecording {
    /// Path of the WAV file, relative to the storage root.
    pub path: PathBuf,
    pub duration: Duration,
    /// Valid samples written, sentinels excluded.
    pub samples: u64,
}

/// A single in-progress WAV capture.
pub struct RecordingSession {
    sink: Option<Box<dyn SinkFile>>,
    path: PathBuf,
    header: WavHeader,
    samples_written: u64,
    samples_since_sync: u64,
    flush_every_samples: u64,
    target_samples: u64,
    started_at: Instant,
}

impl RecordingSession {
    /// Opens the sink and writes the placeholder header.
    ///
    /// The placeholder is synced immediately so an interrupted recording
    /// still starts with a parseable (if stale) header.
    pub fn start(
        storage: &dyn Storage,
        path: &Path,
        sample_rate: u32,
        flush_every_samples: u32,
        target_samples: u64,
        started_at: Instant,
    ) -> Result<Self> {
        let sink_unavailable = |e: std::io::Error| PendantError::SinkUnavailable {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            storage.create_dir_all(parent).map_err(sink_unavailable)?;
        }
        let mut sink = storage.create(path).map_err(sink_unavailable)?;

        let header =
            WavHeader::placeholder(defaults::CHANNELS, sample_rate, defaults::BITS_PER_SAMPLE);
        sink.append(&header.encode())
            .and_then(|_| sink.sync())
            .map_err(|e| PendantError::WriteFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            sink: Some(sink),
            path: path.to_path_buf(),
            header,
            samples_written: 0,
            samples_since_sync: 0,
            flush_every_samples: u64::from(flush_every_samples),
            target_samples,
            started_at,
        })
    }

    /// Appends one frame of samples, dropping sentinels.
    ///
    /// Syncs the sink once enough samples have accumulated since the
    /// last sync. Any write error is fatal to the session.
    pub fn append(&mut self, samples: &[i16]) -> Result<()> {
        let Self {
            sink,
            path,
            samples_written,
            samples_since_sync,
            flush_every_samples,
            ..
        } = self;
        let sink = sink.as_mut().ok_or(PendantError::SessionClosed)?;

        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            if !is_sentinel(sample) {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
        }
        if bytes.is_empty() {
            return Ok(());
        }
        let kept = (bytes.len() / 2) as u64;

        if let Err(e) = sink.append(&bytes) {
            return Err(PendantError::WriteFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            });
        }
        *samples_written += kept;
        *samples_since_sync += kept;

        if *samples_since_sync >= *flush_every_samples {
            if let Err(e) = sink.sync() {
                return Err(PendantError::WriteFailed {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
            *samples_since_sync = 0;
        }
        Ok(())
    }

    /// Patches the true data size into the header and closes the sink.
    ///
    /// If the rewrite fails the audio data is already on the medium; only
    /// the header stays stale.
    pub fn finish(&mut self, now: Instant) -> Result<FinishedRecording> {
        let mut sink = self.sink.take().ok_or(PendantError::SessionClosed)?;

        let data_size = (self.samples_written * 2).min(u64::from(u32::MAX)) as u32;
        let final_header = self.header.with_data_size(data_size);
        sink.write_at(0, &final_header.encode())
            .and_then(|_| sink.sync())
            .map_err(|e| PendantError::HeaderUpdateFailed {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;

        Ok(FinishedRecording {
            path: self.path.clone(),
            duration: now.duration_since(self.started_at),
            samples: self.samples_written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Whether the configured sample target has been met.
    pub fn target_reached(&self) -> bool {
        self.samples_written >= self.target_samples
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }
}
