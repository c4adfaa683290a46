//! Media pipeline: voice-activity gating, utterance assembly, speech-to-text.

pub mod stt;
pub mod utterance;
pub mod vad;
pub mod wake_word;

pub use stt::{HttpTranscriber, Segment, Transcriber, Transcription, TranscriptionFailure};
pub use utterance::UtteranceBuffer;
pub use vad::{EnergyGate, VoiceActivityGate};
pub use wake_word::{CompositeGate, WakeWordDetector};
