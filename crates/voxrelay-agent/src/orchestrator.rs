//! The orchestrator owns the shared adapters and spawns one task per session.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use voxrelay_core::config::{Config, StoreKind};
use voxrelay_core::store::{ConversationStore, InMemoryConversationStore, JsonlConversationStore};
use voxrelay_media::{EnergyGate, HttpTranscriber, Transcriber, VoiceActivityGate};
use voxrelay_providers::{Generator, build_generator};

use crate::session::{PipelineState, VoiceSession};
use crate::sink::ReplySink;

/// Per-session pipeline tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Rate every inbound frame is assumed to be sampled at.
    pub sample_rate: u32,
    /// Bound on one transcription call or one wait for the next fragment.
    pub stage_timeout: Option<Duration>,
    /// Consecutive non-speech chunks that close an utterance (0 = every speech chunk).
    pub utterance_silence_chunks: usize,
    /// Utterances are transcribed once they reach this length.
    pub max_utterance: Duration,
    /// Inputs buffered per session; submitting waits while the inbox is full.
    pub inbox_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            sample_rate: voxrelay_core::audio::DEFAULT_SAMPLE_RATE,
            stage_timeout: None,
            utterance_silence_chunks: 0,
            max_utterance: Duration::from_secs(30),
            inbox_capacity: 32,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        let session = config.session();
        Self {
            sample_rate: config.audio().sample_rate,
            stage_timeout: session.stage_timeout_secs.map(Duration::from_secs),
            utterance_silence_chunks: session.utterance_silence_chunks,
            max_utterance: Duration::from_secs(session.max_utterance_secs),
            inbox_capacity: session.inbox_capacity.max(1),
        }
    }
}

/// Shared, stateless-per-call collaborators plus the conversation store.
pub struct SessionOrchestrator {
    pub(crate) gate: Arc<dyn VoiceActivityGate>,
    pub(crate) transcriber: Arc<dyn Transcriber>,
    pub(crate) generator: Arc<dyn Generator>,
    pub(crate) store: Arc<dyn ConversationStore>,
    pub(crate) settings: OrchestratorSettings,
}

impl SessionOrchestrator {
    pub fn new(
        gate: Arc<dyn VoiceActivityGate>,
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn Generator>,
        store: Arc<dyn ConversationStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            gate,
            transcriber,
            generator,
            store,
            settings,
        }
    }

    /// Build the stock pipeline: energy VAD, HTTP transcription, the configured
    /// generator, and the configured conversation store.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let cap = config.session().history_turns;
        let store: Arc<dyn ConversationStore> = match config.session().store {
            StoreKind::Memory => Arc::new(InMemoryConversationStore::new(cap)),
            StoreKind::Jsonl => Arc::new(JsonlConversationStore::new(config.store_dir(), cap)),
        };

        Ok(Self::new(
            Arc::new(EnergyGate::from_config(&config.audio())),
            Arc::new(HttpTranscriber::from_config(&config.transcription())),
            build_generator(&config.generation())?,
            store,
            OrchestratorSettings::from_config(config),
        ))
    }

    /// Probe both backends. Any failure means no session could work.
    pub async fn ready(&self) -> anyhow::Result<()> {
        self.transcriber.ready().await.with_context(|| {
            format!("transcription backend '{}' is not ready", self.transcriber.id())
        })?;
        self.generator.ready().await.with_context(|| {
            format!("generation backend '{}' is not ready", self.generator.id())
        })?;
        info!(
            transcriber = self.transcriber.id(),
            generator = self.generator.id(),
            "Backends ready"
        );
        Ok(())
    }

    pub fn transcriber(&self) -> &Arc<dyn Transcriber> {
        &self.transcriber
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Start a session task. Cancelling `parent` closes the session too.
    pub fn open_session<S: ReplySink>(
        self: &Arc<Self>,
        session_id: impl Into<String>,
        sink: S,
        parent: &CancellationToken,
    ) -> SessionHandle {
        let id = session_id.into();
        let (inbox_tx, inbox_rx) = mpsc::channel(self.settings.inbox_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);
        let cancel = parent.child_token();

        let session = VoiceSession::new(id.clone(), self.clone(), sink, state_tx);
        let join = tokio::spawn(session.run(inbox_rx, cancel.clone()));

        SessionHandle {
            id,
            inbox: inbox_tx,
            cancel,
            state: state_rx,
            join,
        }
    }
}

/// Work queued for a session, processed strictly in arrival order.
#[derive(Debug)]
pub enum SessionInput {
    /// One binary frame of little-endian `f32` samples.
    Audio(Vec<u8>),
    /// Forget this session's history.
    Reset,
}

/// Owner's handle on a running session.
pub struct SessionHandle {
    pub id: String,
    inbox: mpsc::Sender<SessionInput>,
    cancel: CancellationToken,
    state: watch::Receiver<PipelineState>,
    join: JoinHandle<()>,
}

impl SessionHandle {
    /// Queue an audio frame, waiting while the inbox is full.
    ///
    /// Returns false once the session has closed.
    pub async fn submit_audio(&self, frame: Vec<u8>) -> bool {
        self.inbox.send(SessionInput::Audio(frame)).await.is_ok()
    }

    /// Queue a history reset behind any pending audio.
    pub async fn reset(&self) -> bool {
        self.inbox.send(SessionInput::Reset).await.is_ok()
    }

    /// Close the session, abandoning any in-flight transcription or generation.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Watch pipeline state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the session task to finish its cleanup.
    pub async fn closed(self) {
        let _ = self.join.await;
    }

    /// Close and wait for cleanup.
    pub async fn shutdown(self) {
        self.close();
        self.closed().await;
    }
}
