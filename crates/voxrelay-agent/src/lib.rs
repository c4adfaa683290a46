//! Session orchestration: the voice pipeline that sits between a client
//! connection and the speech/text backends.
//!
//! Each connected client gets one [`SessionHandle`] backed by its own task.
//! Within a session, audio frames are processed strictly one turn at a time:
//! gate, transcribe, read history, generate and stream, record the turn.

pub mod failure;
pub mod metrics;
pub mod orchestrator;
pub mod session;
pub mod sink;

pub use failure::{Stage, StageFailure};
pub use orchestrator::{OrchestratorSettings, SessionHandle, SessionInput, SessionOrchestrator};
pub use session::PipelineState;
pub use sink::{ReplySink, SinkClosed};
