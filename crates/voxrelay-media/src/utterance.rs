//! Utterance assembly: collects speech chunks until the speaker pauses.

use std::time::Duration;

use voxrelay_core::audio::AudioChunk;

/// Buffers consecutive speech chunks into one utterance.
///
/// With `silence_chunks == 0` every speech chunk is its own utterance.
/// Otherwise the utterance ends after that many consecutive non-speech
/// chunks, or once it reaches `max_duration`.
#[derive(Debug)]
pub struct UtteranceBuffer {
    silence_chunks: usize,
    max_samples: usize,
    audio: Option<AudioChunk>,
    trailing_silence: usize,
}

impl UtteranceBuffer {
    pub fn new(silence_chunks: usize, max_duration: Duration, sample_rate: u32) -> Self {
        let max_samples = (max_duration.as_millis() as u64 * sample_rate as u64 / 1000) as usize;
        Self {
            silence_chunks,
            max_samples: max_samples.max(1),
            audio: None,
            trailing_silence: 0,
        }
    }

    /// Whether an utterance is in progress.
    pub fn is_collecting(&self) -> bool {
        self.audio.is_some()
    }

    /// Buffered length in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.audio.as_ref().map(AudioChunk::duration_ms).unwrap_or(0)
    }

    /// Add a speech chunk. Returns the finished utterance when one is complete.
    pub fn push_speech(&mut self, chunk: AudioChunk) -> Option<AudioChunk> {
        self.trailing_silence = 0;
        match &mut self.audio {
            Some(audio) => audio.extend(&chunk),
            None => self.audio = Some(chunk),
        }

        let full = self
            .audio
            .as_ref()
            .is_some_and(|a| a.samples.len() >= self.max_samples);
        if self.silence_chunks == 0 || full {
            return self.take();
        }
        None
    }

    /// Record a non-speech chunk. Returns the utterance once the pause is long enough.
    pub fn push_silence(&mut self) -> Option<AudioChunk> {
        if !self.is_collecting() {
            return None;
        }
        self.trailing_silence += 1;
        if self.trailing_silence >= self.silence_chunks {
            return self.take();
        }
        None
    }

    /// Take whatever is buffered, ending the utterance.
    pub fn take(&mut self) -> Option<AudioChunk> {
        self.trailing_silence = 0;
        self.audio.take()
    }

    pub fn clear(&mut self) {
        self.audio = None;
        self.trailing_silence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(len: usize) -> AudioChunk {
        AudioChunk::new(vec![0.2; len], 16_000)
    }

    #[test]
    fn test_zero_silence_emits_each_chunk() {
        let mut buffer = UtteranceBuffer::new(0, Duration::from_secs(30), 16_000);
        let utterance = buffer.push_speech(chunk(320)).unwrap();
        assert_eq!(utterance.samples.len(), 320);
        assert!(!buffer.is_collecting());
        assert!(buffer.push_silence().is_none());
    }

    #[test]
    fn test_ends_after_silence_run() {
        let mut buffer = UtteranceBuffer::new(2, Duration::from_secs(30), 16_000);
        assert!(buffer.push_speech(chunk(320)).is_none());
        assert!(buffer.push_silence().is_none());
        // Speech resets the pause counter.
        assert!(buffer.push_speech(chunk(320)).is_none());
        assert_eq!(buffer.duration_ms(), 40);
        assert!(buffer.push_silence().is_none());
        let utterance = buffer.push_silence().unwrap();
        assert_eq!(utterance.samples.len(), 640);
        assert!(!buffer.is_collecting());
    }

    #[test]
    fn test_flushes_at_max_duration() {
        let mut buffer = UtteranceBuffer::new(5, Duration::from_millis(100), 16_000);
        assert!(buffer.push_speech(chunk(800)).is_none());
        let utterance = buffer.push_speech(chunk(800)).unwrap();
        assert_eq!(utterance.duration_ms(), 100);
    }

    #[test]
    fn test_silence_without_utterance_is_ignored() {
        let mut buffer = UtteranceBuffer::new(1, Duration::from_secs(1), 16_000);
        assert!(buffer.push_silence().is_none());
        buffer.push_speech(chunk(10));
        buffer.clear();
        assert!(!buffer.is_collecting());
    }
}
