//! Where a session's outbound messages go.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use voxrelay_core::protocol::ServerMessage;

/// The receiving side is gone; the session must close.
#[derive(Debug, Error)]
#[error("reply channel closed")]
pub struct SinkClosed;

/// Ordered outbound channel to one client.
///
/// `send` suspends while the connection applies backpressure. Messages are
/// delivered in the order they were sent.
#[async_trait]
pub trait ReplySink: Send + Sync + 'static {
    async fn send(&self, message: ServerMessage) -> Result<(), SinkClosed>;
}

#[async_trait]
impl ReplySink for mpsc::Sender<ServerMessage> {
    async fn send(&self, message: ServerMessage) -> Result<(), SinkClosed> {
        mpsc::Sender::send(self, message).await.map_err(|_| SinkClosed)
    }
}
