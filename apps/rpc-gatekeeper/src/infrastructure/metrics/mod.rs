//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Calls**: Admitted and rejected calls, admission latency
//! - **Telemetry**: Items dropped at publish or for slow subscribers
//! - **Subscriptions**: Live admin subscribers per stream
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::broadcast::SubscriptionKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
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

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "rpc_gatekeeper_calls_admitted_total",
        "Total calls that passed authorization"
    );
    describe_counter!(
        "rpc_gatekeeper_calls_rejected_total",
        "Total calls rejected by reason"
    );
    describe_histogram!(
        "rpc_gatekeeper_call_duration_seconds",
        "Time from admission to handler completion"
    );

    describe_counter!(
        "rpc_gatekeeper_publish_dropped_total",
        "Telemetry items dropped because the hub queue was full or closed"
    );
    describe_counter!(
        "rpc_gatekeeper_subscriber_dropped_total",
        "Telemetry items dropped for lagging subscribers"
    );
    describe_counter!(
        "rpc_gatekeeper_snapshots_emitted_total",
        "Statistics snapshots delivered to subscribers"
    );

    describe_gauge!(
        "rpc_gatekeeper_subscribers",
        "Number of live admin subscribers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an admitted call.
pub fn record_call_admitted() {
    counter!("rpc_gatekeeper_calls_admitted_total").increment(1);
}

/// Record a rejected call.
pub fn record_call_rejected(reason: &'static str) {
    counter!("rpc_gatekeeper_calls_rejected_total", "reason" => reason).increment(1);
}

/// Record how long an admitted call took.
pub fn record_call_duration(duration: Duration) {
    histogram!("rpc_gatekeeper_call_duration_seconds").record(duration.as_secs_f64());
}

/// Record a telemetry item the hub refused.
pub fn record_publish_drop(kind: SubscriptionKind) {
    counter!("rpc_gatekeeper_publish_dropped_total", "kind" => kind.as_str()).increment(1);
}

/// Record an item dropped for a lagging subscriber.
pub fn record_subscriber_drop(kind: SubscriptionKind) {
    counter!("rpc_gatekeeper_subscriber_dropped_total", "kind" => kind.as_str()).increment(1);
}

/// Record delivered statistics snapshots.
pub fn record_snapshots_emitted(count: u64) {
    counter!("rpc_gatekeeper_snapshots_emitted_total").increment(count);
}

/// Update the live subscriber count for a stream.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(kind: SubscriptionKind, count: usize) {
    gauge!("rpc_gatekeeper_subscribers", "kind" => kind.as_str()).set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_functions_accept_all_labels() {
        record_call_admitted();
        record_call_rejected("unauthenticated");
        record_call_duration(Duration::from_millis(3));
        record_publish_drop(SubscriptionKind::Logs);
        record_subscriber_drop(SubscriptionKind::Statistics);
        record_snapshots_emitted(2);
        set_subscribers(SubscriptionKind::Logs, 4);
    }

    #[test]
    fn init_is_idempotent() {
        let _first = init_metrics();
        let second = init_metrics();
        record_call_admitted();
        assert!(second.render().contains("rpc_gatekeeper_calls_admitted_total"));
        assert!(get_metrics_handle().is_some());
    }
}
