use std::fmt;
use std::time::Duration;

use thiserror::Error;

use voxrelay_core::error::ErrorCode;
use voxrelay_core::protocol::ServerMessage;
use voxrelay_media::TranscriptionFailure;

/// Pipeline stage that can time out or be measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcription,
    Generation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Generation => "generation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable failure of one turn. The session reports it and returns to idle.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("malformed audio: {0}")]
    MalformedInput(String),

    #[error(transparent)]
    Transcription(#[from] TranscriptionFailure),

    #[error("transcription contained no speech")]
    EmptyTranscription,

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("internal error: {0}")]
    Internal(String),
}

impl StageFailure {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MalformedInput(_) => ErrorCode::InvalidAudioFormat,
            Self::Transcription(_) => ErrorCode::TranscriptionFailed,
            Self::EmptyTranscription => ErrorCode::EmptyTranscription,
            Self::Generation(_) => ErrorCode::GenerationFailed,
            Self::Timeout { .. } => ErrorCode::StageTimeout,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Message safe to show a client. Backend details stay in the logs.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "Invalid audio format",
            Self::Transcription(_) => "Failed to transcribe audio",
            Self::EmptyTranscription => "No speech detected",
            Self::Generation(_) => "Failed to generate response",
            Self::Timeout { .. } => "Request timed out",
            Self::Internal(_) => "Internal server error",
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::failure(self.code(), self.client_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_generic_messages() {
        let failure = StageFailure::Transcription(TranscriptionFailure::Backend(
            "502 upstream secret-host.internal".into(),
        ));
        assert_eq!(failure.code(), ErrorCode::TranscriptionFailed);
        let ServerMessage::Failure { error, code, success } = failure.to_message() else {
            panic!("expected a failure message");
        };
        assert!(!success);
        assert_eq!(code, ErrorCode::TranscriptionFailed);
        assert!(!error.contains("secret-host"));
    }

    #[test]
    fn test_timeout_display() {
        let failure = StageFailure::Timeout {
            stage: Stage::Generation,
            after: Duration::from_secs(5),
        };
        assert_eq!(failure.to_string(), "generation timed out after 5s");
        assert_eq!(failure.code(), ErrorCode::StageTimeout);
    }
}
