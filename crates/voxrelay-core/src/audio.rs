//! Raw audio frames as they arrive from a client.

use chrono::{DateTime, Utc};

use crate::error::{Result, VoxRelayError};

/// Sample rate every client is expected to stream at (16 kHz mono).
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// A timestamped block of mono `f32` samples.
///
/// Transient: lives for one pipeline pass and is never persisted.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub received_at: DateTime<Utc>,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            received_at: Utc::now(),
        }
    }

    /// Decode a binary frame of little-endian `f32` samples.
    ///
    /// An empty frame decodes to an empty chunk. A frame whose length is not a
    /// multiple of four bytes, or that carries NaN/infinite samples, is rejected.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(VoxRelayError::Audio(format!(
                "frame length {} is not a multiple of 4 bytes",
                bytes.len()
            )));
        }

        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        if samples.iter().any(|s| !s.is_finite()) {
            return Err(VoxRelayError::Audio(
                "frame contains non-finite samples".into(),
            ));
        }

        Ok(Self::new(samples, sample_rate))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }

    /// Absolute peak amplitude.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Scale samples down so the peak is 1.0 when the peak exceeds 1.0.
    pub fn normalize_peak(&mut self) {
        let peak = self.peak();
        if peak > 1.0 {
            for s in &mut self.samples {
                *s /= peak;
            }
        }
    }

    /// Append another chunk's samples (same sample rate assumed).
    pub fn extend(&mut self, other: &AudioChunk) {
        self.samples.extend_from_slice(&other.samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_round_trip_values() {
        let bytes = encode(&[0.0, 0.5, -0.25]);
        let chunk = AudioChunk::from_le_bytes(&bytes, DEFAULT_SAMPLE_RATE).unwrap();
        assert_eq!(chunk.samples, vec![0.0, 0.5, -0.25]);
        assert_eq!(chunk.sample_rate, 16_000);
    }

    #[test]
    fn test_decode_empty_frame() {
        let chunk = AudioChunk::from_le_bytes(b"", DEFAULT_SAMPLE_RATE).unwrap();
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let err = AudioChunk::from_le_bytes(&[0u8, 1, 2], DEFAULT_SAMPLE_RATE).unwrap_err();
        assert!(err.to_string().contains("multiple of 4"));
    }

    #[test]
    fn test_decode_rejects_nan() {
        let bytes = encode(&[0.1, f32::NAN]);
        assert!(AudioChunk::from_le_bytes(&bytes, DEFAULT_SAMPLE_RATE).is_err());
    }

    #[test]
    fn test_duration_ms() {
        let chunk = AudioChunk::new(vec![0.0; 320], 16_000);
        assert_eq!(chunk.duration_ms(), 20);
    }

    #[test]
    fn test_normalize_peak() {
        let mut loud = AudioChunk::new(vec![2.0, -4.0, 1.0], 16_000);
        loud.normalize_peak();
        assert_eq!(loud.samples, vec![0.5, -1.0, 0.25]);

        let mut quiet = AudioChunk::new(vec![0.2, -0.4], 16_000);
        quiet.normalize_peak();
        assert_eq!(quiet.samples, vec![0.2, -0.4]);
    }
}
