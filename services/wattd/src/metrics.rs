//! Prometheus metrics exposition
//!
//! The engine and notifier record these metrics; this module installs the
//! recorder and configures rendering:
//!
//! - `monitor_cycles_total` (counter): label `outcome`
//! - `monitor_cycle_duration_seconds` (histogram)
//! - `monitor_notifications_total` (counter): label `result`
//! - `monitor_last_balance` (gauge)

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `monitor_cycle_duration_seconds` with histogram buckets so it
/// renders as a Prometheus histogram (with `_bucket` lines for
/// `histogram_quantile()` queries) rather than the default summary. A cycle
/// is bounded by at most two remote calls, so the buckets cover 50ms to 60s.
///
/// The handle's `render()` method produces the Prometheus text exposition
/// format suitable for serving on a `/metrics` endpoint.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "monitor_cycle_duration_seconds".to_string(),
            ),
            &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}
