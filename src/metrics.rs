//! Prometheus metrics for mutation handling.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, and exposes the `/metrics` endpoint
//! handler used by the admin router.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Write requests received by a replica (counter).
pub const MUTATIONS_RECEIVED_TOTAL: &str = "mutation_relay_mutations_received_total";

/// Copies relayed to forward targets (counter).
pub const MUTATIONS_FORWARDED_TOTAL: &str = "mutation_relay_mutations_forwarded_total";

/// Acknowledgments sent after a successful local apply (counter).
pub const MUTATION_ACKS_SENT_TOTAL: &str = "mutation_relay_mutation_acks_sent_total";

/// Writes that produced no acknowledgment (counter). Labels: reason.
pub const MUTATIONS_DROPPED_TOTAL: &str = "mutation_relay_mutations_dropped_total";

/// Local apply duration in seconds (histogram).
pub const MUTATION_APPLY_DURATION_SECONDS: &str = "mutation_relay_mutation_apply_duration_seconds";

/// Coordinator writes by outcome (counter). Labels: outcome.
pub const COORDINATOR_WRITES_TOTAL: &str = "mutation_relay_coordinator_writes_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(MUTATIONS_RECEIVED_TOTAL, "Write requests received");
    describe_counter!(MUTATIONS_FORWARDED_TOTAL, "Write copies relayed to other replicas");
    describe_counter!(MUTATION_ACKS_SENT_TOTAL, "Acknowledgments sent for applied writes");
    describe_counter!(
        MUTATIONS_DROPPED_TOTAL,
        "Writes that were not acknowledged, by reason"
    );
    describe_histogram!(
        MUTATION_APPLY_DURATION_SECONDS,
        "Local apply duration in seconds"
    );
    describe_counter!(COORDINATOR_WRITES_TOTAL, "Coordinator writes by outcome");
}

/// Render the current metrics, or an empty body if no recorder is installed.
pub fn render() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        render(),
    )
}

// -- Tests --------------------------------------------------------------------
