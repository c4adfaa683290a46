//! Wake-word gating composed behind the voice-activity gate.

use std::sync::Arc;

use voxrelay_core::audio::AudioChunk;

use crate::vad::VoiceActivityGate;

/// An external wake-word primitive.
pub trait WakeWordDetector: Send + Sync {
    fn detect(&self, chunk: &AudioChunk) -> bool;
}

/// VAD first, then the optional wake-word detector. Both must admit the chunk.
pub struct CompositeGate {
    vad: Arc<dyn VoiceActivityGate>,
    wake_word: Option<Arc<dyn WakeWordDetector>>,
}

impl CompositeGate {
    pub fn new(vad: Arc<dyn VoiceActivityGate>) -> Self {
        Self {
            vad,
            wake_word: None,
        }
    }

    pub fn with_wake_word(mut self, detector: Arc<dyn WakeWordDetector>) -> Self {
        self.wake_word = Some(detector);
        self
    }
}

impl VoiceActivityGate for CompositeGate {
    fn is_speech(&self, chunk: &AudioChunk) -> bool {
        if !self.vad.is_speech(chunk) {
            return false;
        }
        match &self.wake_word {
            Some(detector) => detector.detect(chunk),
            None => true,
        }
    }
}
