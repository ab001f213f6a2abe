//! Metrics definitions for the relay service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label is bounded by an enum in code:
//! - `role`: host, guest
//! - `status`: success, error
//! - `kind`: relay, key_exchange (frames) or usage, audit (side effects)
//! - `reason`: backpressure, closed (drops) or superseded, stale, shutdown (evictions)
//! - `error_type`: bounded by `RelayError::error_type_label`
//!
//! Session keys, identities and connection ids are never used as labels.

use crate::registry::RegistryStats;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Join duration includes credential verification and database lookups, so
/// its buckets match a database-backed request.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("relay_join".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set join duration buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("relay_db_query".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Connection & Session Metrics (Gauges)
// ============================================================================

/// A transport connection was accepted.
///
/// Metric: `relay_connections_active`
pub fn connection_opened() {
    gauge!("relay_connections_active").increment(1.0);
}

/// A transport connection ended.
///
/// Metric: `relay_connections_active`
pub fn connection_closed() {
    gauge!("relay_connections_active").decrement(1.0);
}

/// Publish registry counts.
///
/// Metrics: `relay_sessions_active`, `relay_hosts_connected`, `relay_guests_connected`
pub fn set_registry_stats(stats: RegistryStats) {
    // usize to f64 conversion is safe for realistic registry sizes (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    {
        gauge!("relay_sessions_active").set(stats.sessions as f64);
        gauge!("relay_hosts_connected").set(stats.hosts as f64);
        gauge!("relay_guests_connected").set(stats.guests as f64);
    }
}

/// Set the registry actor mailbox depth.
///
/// Metric: `relay_registry_mailbox_depth`
pub fn set_registry_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_registry_mailbox_depth").set(depth as f64);
}

// ============================================================================
// Join Metrics
// ============================================================================

/// Record a join attempt.
///
/// Metrics: `relay_joins_total`, `relay_join_duration_seconds`
/// Labels: `role`, `status`
///
/// Cardinality: 4 (2 roles x 2 statuses)
pub fn record_join(role: &str, status: &str, duration: Duration) {
    histogram!("relay_join_duration_seconds", "role" => role.to_string())
        .record(duration.as_secs_f64());
    counter!("relay_joins_total",
        "role" => role.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Routing Metrics (Counters)
// ============================================================================

/// Record a frame fanned out by the router.
///
/// Metric: `relay_frames_routed_total`
/// Labels: `kind` (relay, key_exchange)
pub fn record_frame_routed(kind: &str) {
    counter!("relay_frames_routed_total", "kind" => kind.to_string()).increment(1);
}

/// Record a per-recipient delivery that was dropped.
///
/// Metric: `relay_deliveries_dropped_total`
/// Labels: `reason` (backpressure, closed)
///
/// Sustained backpressure drops mean a peer is not draining its socket.
pub fn record_delivery_dropped(reason: &str) {
    counter!("relay_deliveries_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record an eviction.
///
/// Metric: `relay_evictions_total`
/// Labels: `reason` (superseded, stale, shutdown)
pub fn record_eviction(reason: &str, count: usize) {
    counter!("relay_evictions_total", "reason" => reason.to_string())
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution.
///
/// Metrics: `relay_db_query_duration_seconds`, `relay_db_queries_total`
/// Labels: `operation`, `status`
///
/// Operations: find_code, record_usage, find_session, session_owned_by,
///             insert_connection
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("relay_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("relay_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Error Metrics
// ============================================================================

/// Record an error returned to a client.
///
/// Metric: `relay_errors_total`
/// Labels: `error_type`
pub fn record_error(error_type: &str) {
    counter!("relay_errors_total", "error_type" => error_type.to_string()).increment(1);
}

/// Record a side effect that failed after all attempts.
///
/// Metric: `relay_side_effect_failures_total`
/// Labels: `kind` (usage, audit)
///
/// Side-effect failures never affect the join that triggered them.
pub fn record_side_effect_failure(kind: &str) {
    counter!("relay_side_effect_failures_total", "kind" => kind.to_string()).increment(1);
}
