//! Prometheus Metrics Module
//!
//! Exposes relay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Sessions**: active session gauge, lifetime connect counter,
//!   forced closes by reason
//! - **Relay**: messages fanned out, dropped, snapshots replayed
//! - **Broker**: reconnect attempts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

fn register_metrics() {
    describe_gauge!(
        "feed_relay_active_sessions",
        "Number of currently connected client sessions"
    );
    describe_counter!(
        "feed_relay_sessions_total",
        "Total client sessions accepted since startup"
    );
    describe_counter!(
        "feed_relay_forced_closes_total",
        "Sessions forcibly closed, labeled by reason"
    );
    describe_counter!(
        "feed_relay_invalid_requests_total",
        "Control frames rejected with an inline error"
    );
    describe_counter!(
        "feed_relay_messages_relayed_total",
        "Frames delivered to session queues"
    );
    describe_counter!(
        "feed_relay_messages_dropped_total",
        "Frames dropped because a session queue was full"
    );
    describe_counter!(
        "feed_relay_snapshots_replayed_total",
        "Cached snapshots replayed to new subscribers"
    );
    describe_counter!(
        "feed_relay_broker_reconnects_total",
        "Broker reconnection attempts"
    );
}
