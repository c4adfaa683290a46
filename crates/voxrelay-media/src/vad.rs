//! Energy-based voice activity gating.

use voxrelay_core::audio::AudioChunk;
use voxrelay_core::config::AudioConfig;

/// Decides whether an audio chunk contains speech worth forwarding.
///
/// Implementations are pure per chunk. A chunk that cannot be classified
/// (empty, wrong sample rate, non-finite samples) is silence.
pub trait VoiceActivityGate: Send + Sync {
    fn is_speech(&self, chunk: &AudioChunk) -> bool;
}

/// RMS energy gate over fixed-length sub-frames of `f32` samples.
///
/// A chunk counts as speech when at least `min_speech_ratio` of its
/// sub-frames have an RMS above `threshold`.
#[derive(Debug, Clone)]
pub struct EnergyGate {
    threshold: f32,
    frame_samples: usize,
    min_speech_ratio: f32,
    sample_rate: u32,
}

impl EnergyGate {
    pub fn new(threshold: f32, frame_ms: u32, min_speech_ratio: f32, sample_rate: u32) -> Self {
        let frame_samples = ((sample_rate as u64 * frame_ms as u64) / 1000).max(1) as usize;
        Self {
            threshold,
            frame_samples,
            min_speech_ratio,
            sample_rate,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(
            config.vad_threshold,
            config.frame_ms,
            config.min_speech_ratio,
            config.sample_rate,
        )
    }

    /// Root-mean-square level of a frame.
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = samples.iter().map(|s| s * s).sum();
        (sum / samples.len() as f32).sqrt()
    }

    /// Fraction of sub-frames above the threshold, `None` if the chunk is unusable.
    pub fn speech_ratio(&self, chunk: &AudioChunk) -> Option<f32> {
        if chunk.is_empty()
            || chunk.sample_rate != self.sample_rate
            || chunk.samples.iter().any(|s| !s.is_finite())
        {
            return None;
        }

        let mut total = 0usize;
        let mut voiced = 0usize;
        for frame in chunk.samples.chunks(self.frame_samples) {
            total += 1;
            if Self::rms(frame) > self.threshold {
                voiced += 1;
            }
        }
        Some(voiced as f32 / total as f32)
    }
}

impl Default for EnergyGate {
    fn default() -> Self {
        Self::from_config(&AudioConfig::default())
    }
}

impl VoiceActivityGate for EnergyGate {
    fn is_speech(&self, chunk: &AudioChunk) -> bool {
        match self.speech_ratio(chunk) {
            Some(ratio) => ratio > 0.0 && ratio >= self.min_speech_ratio,
            None => false,
        }
    }
}
