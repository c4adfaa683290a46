use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoxRelayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxRelayError>;

/// Machine-readable error codes surfaced to clients alongside a generic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidAudioFormat,
    TranscriptionFailed,
    EmptyTranscription,
    GenerationFailed,
    StageTimeout,
    SessionConflict,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidAudioFormat => "INVALID_AUDIO_FORMAT",
            Self::TranscriptionFailed => "TRANSCRIPTION_FAILED",
            Self::EmptyTranscription => "EMPTY_TRANSCRIPTION",
            Self::GenerationFailed => "GENERATION_FAILED",
            Self::StageTimeout => "STAGE_TIMEOUT",
            Self::SessionConflict => "SESSION_CONFLICT",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
