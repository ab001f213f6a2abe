//! Observability for the relay service.
//!
//! # Privacy by Default
//!
//! Relay payloads, key material and tokens are never logged or used as
//! metric labels. Session keys and identities appear only as log fields at
//! debug level.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `relay_connections_active` | Gauge | none |
//! | `relay_sessions_active` | Gauge | none |
//! | `relay_hosts_connected` | Gauge | none |
//! | `relay_guests_connected` | Gauge | none |
//! | `relay_joins_total` | Counter | `role`, `status` |
//! | `relay_join_duration_seconds` | Histogram | `role` |
//! | `relay_frames_routed_total` | Counter | `kind` |
//! | `relay_deliveries_dropped_total` | Counter | `reason` |
//! | `relay_evictions_total` | Counter | `reason` |
//! | `relay_errors_total` | Counter | `error_type` |
//! | `relay_side_effect_failures_total` | Counter | `kind` |
//! | `relay_registry_mailbox_depth` | Gauge | none |
//! | `relay_db_queries_total` | Counter | `operation`, `status` |
//! | `relay_db_query_duration_seconds` | Histogram | `operation` |

pub mod health;
pub mod metrics;
pub mod stats;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
pub use stats::{spawn_stats_reporter, DEFAULT_STATS_INTERVAL};
