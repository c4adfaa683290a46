//! Axum-based WebSocket server.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use voxrelay_core::audio::AudioChunk;
use voxrelay_core::error::ErrorCode;
use voxrelay_core::protocol::ErrorBody;

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

/// Build the gateway router.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/{client_id}", get(ws_client_handler))
        .route("/health", get(health_handler))
        .route("/transcribe", post(transcribe_handler));

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(metrics_handler));

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve on an already-bound listener until `state.shutdown` is cancelled.
pub async fn serve(state: Arc<GatewayState>, listener: TcpListener) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state
        .config
        .gateway
        .as_ref()
        .and_then(|g| g.bind.clone())
        .unwrap_or_else(|| "0.0.0.0".to_string());

    let addr = format!("{bind_addr}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    tokio::spawn(shutdown_signal(state.clone()));
    serve(state, listener).await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> Response {
    upgrade(ws, state, Uuid::new_v4().to_string())
}

async fn ws_client_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    upgrade(ws, state, client_id)
}

fn upgrade(ws: WebSocketUpgrade, state: Arc<GatewayState>, session_id: String) -> Response {
    let max_frame = state.config.gateway().max_frame_bytes;
    ws.max_message_size(max_frame)
        .max_frame_size(max_frame)
        .on_upgrade(move |socket| handle_ws_connection(state, socket, session_id))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let sessions = state.session_count().await;

    Json(json!({
        "status": "healthy",
        "version": version,
        "sessions": sessions,
    }))
}

fn error_response(status: StatusCode, code: ErrorCode, message: &str) -> Response {
    let body = ErrorBody {
        message: message.to_string(),
        error_code: code,
    };
    (status, Json(body)).into_response()
}

/// One-shot transcription of a raw `f32` sample body.
async fn transcribe_handler(State(state): State<Arc<GatewayState>>, body: Bytes) -> Response {
    let started = Instant::now();
    let response = transcribe(&state, &body).await;

    #[cfg(feature = "metrics")]
    crate::metrics::record_transcribe_request(
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    info!(
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Transcribe request"
    );
    response
}

async fn transcribe(state: &GatewayState, body: &[u8]) -> Response {
    let sample_rate = state.orchestrator.settings().sample_rate;
    let mut audio = match AudioChunk::from_le_bytes(body, sample_rate) {
        Ok(audio) if !audio.is_empty() => audio,
        Ok(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidAudioFormat,
                "Audio body is empty",
            );
        }
        Err(e) => {
            warn!(error = %e, "Rejected transcription body");
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidAudioFormat,
                "Invalid audio format",
            );
        }
    };
    audio.normalize_peak();

    match state.orchestrator.transcriber().transcribe(&audio).await {
        Ok(transcription) => Json(transcription).into_response(),
        Err(e) => {
            error!(error = %e, "One-shot transcription failed");
            error_response(
                StatusCode::BAD_GATEWAY,
                ErrorCode::TranscriptionFailed,
                "Failed to transcribe audio",
            )
        }
    }
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// Wait for Ctrl-C, then cancel every session and stop the server.
async fn shutdown_signal(state: Arc<GatewayState>) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to install Ctrl-C handler");
                return;
            }
            info!("Shutdown signal received");
            state.shutdown.cancel();
        }
        _ = state.shutdown.cancelled() => {}
    }
}
