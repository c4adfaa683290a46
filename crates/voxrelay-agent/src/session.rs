//! One voice session: a task that owns the client's pipeline state.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use voxrelay_core::audio::AudioChunk;
use voxrelay_core::protocol::ServerMessage;
use voxrelay_media::UtteranceBuffer;

use crate::failure::{Stage, StageFailure};
use crate::metrics;
use crate::orchestrator::{SessionInput, SessionOrchestrator};
use crate::sink::{ReplySink, SinkClosed};

/// Where a session is in its turn cycle.
///
/// `Idle → AwaitingVoice → Transcribing → Generating → Idle`, with `Closed`
/// reachable from anywhere and final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    AwaitingVoice,
    Transcribing,
    Generating,
    Closed,
}

pub(crate) struct VoiceSession<S> {
    id: String,
    orchestrator: Arc<SessionOrchestrator>,
    sink: S,
    utterance: UtteranceBuffer,
    state: watch::Sender<PipelineState>,
    last_activity: DateTime<Utc>,
}

/// Await `fut`, failing with `Timeout` if a limit is set and exceeded.
async fn bounded<F: Future>(
    limit: Option<Duration>,
    stage: Stage,
    fut: F,
) -> Result<F::Output, StageFailure> {
    match limit {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| StageFailure::Timeout { stage, after }),
        None => Ok(fut.await),
    }
}

impl<S: ReplySink> VoiceSession<S> {
    pub(crate) fn new(
        id: String,
        orchestrator: Arc<SessionOrchestrator>,
        sink: S,
        state: watch::Sender<PipelineState>,
    ) -> Self {
        let settings = &orchestrator.settings;
        let utterance = UtteranceBuffer::new(
            settings.utterance_silence_chunks,
            settings.max_utterance,
            settings.sample_rate,
        );
        Self {
            id,
            orchestrator,
            sink,
            utterance,
            state,
            last_activity: Utc::now(),
        }
    }

    fn set_state(&self, next: PipelineState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(session_id = %self.id, from = ?prev, to = ?next, "Pipeline state");
        }
    }

    /// Process inputs one at a time until cancelled, the inbox closes, or the
    /// client stops receiving.
    pub(crate) async fn run(
        mut self,
        mut inbox: mpsc::Receiver<SessionInput>,
        cancel: CancellationToken,
    ) {
        metrics::record_session_open();
        info!(session_id = %self.id, "Session opened");

        loop {
            let input = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                input = inbox.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };

            // Dropping the in-flight future on cancel aborts the backend call.
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.handle(input) => outcome,
            };
            if outcome.is_err() {
                debug!(session_id = %self.id, "Client stopped receiving");
                break;
            }
        }

        inbox.close();
        self.close().await;
    }

    async fn handle(&mut self, input: SessionInput) -> Result<(), SinkClosed> {
        self.last_activity = Utc::now();
        match input {
            SessionInput::Reset => {
                self.utterance.clear();
                if let Err(e) = self.orchestrator.store.reset(&self.id).await {
                    error!(session_id = %self.id, error = %e, "History reset failed");
                    return self.fail(StageFailure::Internal(e.to_string())).await;
                }
                self.set_state(PipelineState::Idle);
                info!(session_id = %self.id, "History reset");
                Ok(())
            }
            SessionInput::Audio(frame) => self.handle_audio(&frame).await,
        }
    }

    async fn handle_audio(&mut self, frame: &[u8]) -> Result<(), SinkClosed> {
        let chunk = match AudioChunk::from_le_bytes(frame, self.orchestrator.settings.sample_rate) {
            Ok(chunk) => chunk,
            Err(e) => return self.fail(StageFailure::MalformedInput(e.to_string())).await,
        };

        if !self.orchestrator.gate.is_speech(&chunk) {
            if let Some(utterance) = self.utterance.push_silence() {
                return self.run_turn(utterance).await;
            }
            if !self.utterance.is_collecting() {
                self.set_state(PipelineState::Idle);
            }
            return Ok(());
        }

        self.set_state(PipelineState::AwaitingVoice);
        match self.utterance.push_speech(chunk) {
            Some(utterance) => self.run_turn(utterance).await,
            None => Ok(()),
        }
    }

    /// Transcribe one utterance, generate and stream the reply, record the turn.
    async fn run_turn(&mut self, mut audio: AudioChunk) -> Result<(), SinkClosed> {
        let limit = self.orchestrator.settings.stage_timeout;
        audio.normalize_peak();

        self.set_state(PipelineState::Transcribing);
        let started = Instant::now();
        let transcribed = bounded(
            limit,
            Stage::Transcription,
            self.orchestrator.transcriber.transcribe(&audio),
        )
        .await;
        let transcription = match transcribed {
            Ok(Ok(transcription)) => transcription,
            Ok(Err(e)) => return self.fail(StageFailure::Transcription(e)).await,
            Err(timeout) => return self.fail(timeout).await,
        };
        metrics::record_stage(Stage::Transcription, started.elapsed());

        if transcription.is_blank() {
            return self.fail(StageFailure::EmptyTranscription).await;
        }
        let user_text = transcription.text.trim().to_string();
        debug!(
            session_id = %self.id,
            chars = user_text.len(),
            audio_ms = audio.duration_ms(),
            "Transcribed utterance"
        );

        self.set_state(PipelineState::Generating);
        let history = match self.orchestrator.store.get_history(&self.id).await {
            Ok(history) => history,
            Err(e) => return self.fail(StageFailure::Internal(e.to_string())).await,
        };

        let started = Instant::now();
        let generator = self.orchestrator.generator.clone();
        let mut fragments =
            match bounded(limit, Stage::Generation, generator.generate(&user_text, &history)).await {
                Ok(fragments) => fragments,
                Err(timeout) => return self.fail(timeout).await,
            };

        loop {
            let next = match bounded(limit, Stage::Generation, fragments.next()).await {
                Ok(next) => next,
                Err(timeout) => return self.fail(timeout).await,
            };
            let Some(fragment) = next else {
                return self
                    .fail(StageFailure::Generation("stream ended without a final fragment".into()))
                    .await;
            };
            if !fragment.success {
                let reason = fragment.error.unwrap_or_else(|| "unknown error".into());
                return self.fail(StageFailure::Generation(reason)).await;
            }

            if fragment.finished {
                metrics::record_stage(Stage::Generation, started.elapsed());
                // Commit before the client sees the final fragment.
                if let Err(e) = self
                    .orchestrator
                    .store
                    .append_turn_pair(&self.id, &user_text, &fragment.text)
                    .await
                {
                    return self
                        .fail(StageFailure::Internal(format!("failed to record turn: {e}")))
                        .await;
                }
                metrics::record_turn();
                self.sink
                    .send(ServerMessage::fragment(fragment.text, true))
                    .await?;
                self.set_state(PipelineState::Idle);
                return Ok(());
            }

            self.sink
                .send(ServerMessage::fragment(fragment.text, false))
                .await?;
        }
    }

    /// Report a stage failure and return to idle. History is never touched.
    async fn fail(&mut self, failure: StageFailure) -> Result<(), SinkClosed> {
        match &failure {
            StageFailure::Internal(_) => {
                error!(session_id = %self.id, code = %failure.code(), error = %failure, "Stage failed")
            }
            _ => warn!(session_id = %self.id, code = %failure.code(), error = %failure, "Stage failed"),
        }
        metrics::record_failure(failure.code());
        self.utterance.clear();
        self.set_state(PipelineState::Idle);
        self.sink.send(failure.to_message()).await
    }

    async fn close(&mut self) {
        self.set_state(PipelineState::Closed);
        if let Err(e) = self.orchestrator.store.release(&self.id).await {
            warn!(session_id = %self.id, error = %e, "Failed to release history");
        }
        metrics::record_session_close();
        let idle_secs = (Utc::now() - self.last_activity).num_seconds();
        info!(session_id = %self.id, idle_secs, "Session closed");
    }
}
