//! Pipeline metrics. No-ops unless the binary installs a recorder.

use std::time::Duration;

use voxrelay_core::error::ErrorCode;

use crate::failure::Stage;

pub fn record_session_open() {
    metrics::gauge!("voxrelay_sessions_active").increment(1.0);
}

pub fn record_session_close() {
    metrics::gauge!("voxrelay_sessions_active").decrement(1.0);
}

/// Record how long a stage took.
pub fn record_stage(stage: Stage, elapsed: Duration) {
    let labels = [("stage", stage.as_str().to_string())];
    metrics::histogram!("voxrelay_stage_duration_seconds", &labels).record(elapsed.as_secs_f64());
}

/// Record a failure sent to a client.
pub fn record_failure(code: ErrorCode) {
    let labels = [("code", code.as_str().to_string())];
    metrics::counter!("voxrelay_failures_total", &labels).increment(1);
}

/// Record a completed user/assistant turn.
pub fn record_turn() {
    metrics::counter!("voxrelay_turns_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        record_session_open();
        record_stage(Stage::Transcription, Duration::from_millis(120));
        record_failure(ErrorCode::EmptyTranscription);
        record_turn();
        record_session_close();
    }
}
