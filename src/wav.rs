//! Canonical 44-byte linear-PCM WAV header.
//!
//! A recording starts with a placeholder header (size fields zero) and
//! gets the true sizes written over it when the session finishes, so a
//! crash mid-recording leaves a detectably-stale header rather than a
//! corrupt file.

use crate::error::{PendantError, Result};

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 44;

/// The format fields of a PCM WAV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Size of the data chunk in bytes.
    pub data_size: u32,
}

impl WavHeader {
    /// Header for a recording whose length is not yet known.
    pub fn placeholder(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample,
            data_size: 0,
        }
    }

    /// The same format with the final data size filled in.
    pub fn with_data_size(self, data_size: u32) -> Self {
        Self { data_size, ..self }
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bits_per_sample as u32 / 8)
    }

    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    /// Serializes the 44-byte header, little-endian throughout.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];

        bytes[0..4].copy_from_slice(b"RIFF");
        bytes[4..8].copy_from_slice(&(36 + self.data_size).to_le_bytes());
        bytes[8..12].copy_from_slice(b"WAVE");

        bytes[12..16].copy_from_slice(b"fmt ");
        bytes[16..20].copy_from_slice(&16u32.to_le_bytes());
        bytes[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
        bytes[22..24].copy_from_slice(&self.channels.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        bytes[28..32].copy_from_slice(&self.byte_rate().to_le_bytes());
        bytes[32..34].copy_from_slice(&self.block_align().to_le_bytes());
        bytes[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());

        bytes[36..40].copy_from_slice(b"data");
        bytes[40..44].copy_from_slice(&self.data_size.to_le_bytes());

        bytes
    }

    /// Parses and validates a header written by [`WavHeader::encode`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(PendantError::InvalidHeader {
                message: format!("expected {} bytes, got {}", HEADER_LEN, bytes.len()),
            });
        }

        if &bytes[0..4] != b"RIFF" {
            return Err(PendantError::InvalidHeader {
                message: "missing RIFF tag".to_string(),
            });
        }
        if &bytes[8..12] != b"WAVE" {
            return Err(PendantError::InvalidHeader {
                message: "missing WAVE tag".to_string(),
            });
        }
        if &bytes[12..16] != b"fmt " {
            return Err(PendantError::InvalidHeader {
                message: "missing fmt chunk".to_string(),
            });
        }

        let subchunk1_size = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        if subchunk1_size != 16 {
            return Err(PendantError::InvalidHeader {
                message: format!("unexpected fmt chunk size {}", subchunk1_size),
            });
        }

        let audio_format = u16::from_le_bytes([bytes[20], bytes[21]]);
        if audio_format != 1 {
            return Err(PendantError::InvalidHeader {
                message: format!("not linear PCM (format {})", audio_format),
            });
        }

        if &bytes[36..40] != b"data" {
            return Err(PendantError::InvalidHeader {
                message: "missing data chunk".to_string(),
            });
        }

        let chunk_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let data_size = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
        if chunk_size != 36 + data_size {
            return Err(PendantError::InvalidHeader {
                message: format!(
                    "chunk size {} does not match data size {}",
                    chunk_size, data_size
                ),
            });
        }

        Ok(Self {
            channels: u16::from_le_bytes([bytes[22], bytes[23]]),
            sample_rate: u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
            bits_per_sample: u16::from_le_bytes([bytes[34], bytes[35]]),
            data_size,
        })
    }
}
