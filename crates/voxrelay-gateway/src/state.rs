//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use voxrelay_agent::SessionOrchestrator;
use voxrelay_core::config::Config;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<SessionOrchestrator>,
    /// Live connections keyed by session id.
    pub connections: RwLock<HashMap<String, ConnectionState>>,
    /// Cancelled on shutdown; every session token is a child of it.
    pub shutdown: CancellationToken,
    #[cfg(feature = "metrics")]
    pub prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

/// Per-connection bookkeeping.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub session_id: String,
    pub connected_at: Instant,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, orchestrator: Arc<SessionOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
            connections: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            #[cfg(feature = "metrics")]
            prometheus: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_prometheus(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Claim a session id. Returns false if a live connection already holds it.
    pub async fn register(&self, session_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        if connections.contains_key(session_id) {
            return false;
        }
        connections.insert(
            session_id.to_string(),
            ConnectionState {
                session_id: session_id.to_string(),
                connected_at: Instant::now(),
            },
        );
        true
    }

    /// Release a session id, returning how long it was held.
    pub async fn unregister(&self, session_id: &str) -> Option<Duration> {
        self.connections
            .write()
            .await
            .remove(session_id)
            .map(|conn| conn.connected_at.elapsed())
    }

    pub async fn session_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
