//! Prometheus metrics for Strandgate
//!
//! Counters are recorded through the `metrics` facade and are no-ops until a
//! recorder is installed. [`MetricsRecorder`] installs the Prometheus recorder
//! and [`serve_metrics`] exposes it at `/metrics`.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use strandgate_core::{Error, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use crate::session::ListenerKind;

/// Metric names
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "strandgate_connections_total";
    pub const ACTIVE_SESSIONS: &str = "strandgate_active_sessions";
    pub const BINDS_TOTAL: &str = "strandgate_binds_total";
    pub const SEARCHES_TOTAL: &str = "strandgate_searches_total";
    pub const DECISION_ERRORS_TOTAL: &str = "strandgate_decision_errors_total";
    pub const UPTIME_SECONDS: &str = "strandgate_uptime_seconds";
    pub const INFO: &str = "strandgate_info";
}

pub fn record_connection(listener: ListenerKind) {
    counter!(names::CONNECTIONS_TOTAL, "listener" => listener.as_str()).increment(1);
}

pub fn set_active_sessions(listener: ListenerKind, count: usize) {
    gauge!(names::ACTIVE_SESSIONS, "listener" => listener.as_str()).set(count as f64);
}

/// `result` is one of `success`, `denied`, `error`
pub fn record_bind(listener: ListenerKind, result: &'static str) {
    counter!(
        names::BINDS_TOTAL,
        "listener" => listener.as_str(),
        "result" => result
    )
    .increment(1);
}

/// `result` is one of `success`, `denied`, `error`
pub fn record_search(listener: ListenerKind, result: &'static str) {
    counter!(
        names::SEARCHES_TOTAL,
        "listener" => listener.as_str(),
        "result" => result
    )
    .increment(1);
}

pub fn record_decision_error(listener: ListenerKind, operation: &'static str) {
    counter!(
        names::DECISION_ERRORS_TOTAL,
        "listener" => listener.as_str(),
        "operation" => operation
    )
    .increment(1);
}

/// Installed Prometheus recorder
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
    start_time: Instant,
}

impl MetricsRecorder {
    /// Install the global Prometheus recorder. Fails if a recorder is
    /// already installed.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| Error::InternalError(format!("Failed to install metrics recorder: {}", e)))?;

        gauge!(names::INFO, "version" => strandgate_core::VERSION).set(1.0);

        Ok(Self {
            handle,
            start_time: Instant::now(),
        })
    }

    /// Get metrics output in Prometheus format
    pub fn render(&self) -> String {
        gauge!(names::UPTIME_SECONDS).set(self.start_time.elapsed().as_secs_f64());
        self.handle.render()
    }
}

async fn metrics_handler(State(recorder): State<Arc<MetricsRecorder>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        recorder.render(),
    )
}

/// Serve `/metrics` on an already bound listener until shutdown
pub async fn serve_metrics(
    listener: TcpListener,
    recorder: Arc<MetricsRecorder>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(recorder);

    info!(address = %listener.local_addr()?, "metrics endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;
    Ok(())
}
