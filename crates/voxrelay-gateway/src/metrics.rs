//! Prometheus metrics recording and endpoint.

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
///
/// Fails if another recorder is already installed in this process.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record a new WebSocket connection.
pub fn record_ws_connect() {
    metrics::gauge!("voxrelay_ws_connections_active").increment(1.0);
}

/// Record a WebSocket disconnection.
pub fn record_ws_disconnect() {
    metrics::gauge!("voxrelay_ws_connections_active").decrement(1.0);
}

/// Record a refused connection.
pub fn record_rejected(reason: &str) {
    let labels = [("reason", reason.to_string())];
    metrics::counter!("voxrelay_ws_rejected_total", &labels).increment(1);
}

/// Record a one-shot transcription request with its duration.
pub fn record_transcribe_request(status: u16, duration_secs: f64) {
    let labels = [("status", status.to_string())];
    metrics::counter!("voxrelay_transcribe_requests_total", &labels).increment(1);
    metrics::histogram!("voxrelay_transcribe_duration_seconds", &labels).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_prometheus_recorder() {
        // Only one recorder per process; this is the only test that installs one.
        let handle = install_prometheus_recorder().unwrap();
        record_ws_connect();
        record_rejected("session_conflict");
        let output = handle.render();
        assert!(output.contains("voxrelay_ws_rejected_total"));
        assert!(install_prometheus_recorder().is_err());
    }

    #[test]
    fn test_record_does_not_panic() {
        record_ws_disconnect();
        record_transcribe_request(200, 0.25);
    }
}
