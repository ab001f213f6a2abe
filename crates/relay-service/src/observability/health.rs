//! Health endpoints for the relay.
//!
//! - `GET /health` - Liveness probe, with registry counts
//! - `GET /ready` - Readiness probe (can we accept connections?)
//!
//! The `/metrics` endpoint is served separately via `metrics-exporter-prometheus`.
//!
//! # Health State
//!
//! The `HealthState` tracks:
//! - `live`: Always true after startup (process is running)
//! - `ready`: True once the relay listener is serving, false while draining
//!
//! Liveness also requires the registry actor to answer. If it has stopped,
//! no join can succeed and the pod should be restarted.

use crate::actors::RegistryActorHandle;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Health state for the relay.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the service as ready to serve traffic.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Check if the service is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct HealthRouterState {
    health: Arc<HealthState>,
    registry: RegistryActorHandle,
}

/// Create the health router with liveness and readiness endpoints.
///
/// # Endpoints
///
/// - `GET /health` - 200 with `{status, timestamp, stats}` while the registry
///   actor answers, 503 otherwise
/// - `GET /ready` - 200 if ready to serve traffic, 503 otherwise
pub fn health_router(health_state: Arc<HealthState>, registry: RegistryActorHandle) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(HealthRouterState {
            health: health_state,
            registry,
        })
}

async fn liveness_handler(State(state): State<HealthRouterState>) -> Response {
    if !state.health.is_live() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match state.registry.stats().await {
        Ok(stats) => Json(json!({
            "status": "ok",
            "timestamp": Utc::now().to_rfc3339(),
            "stats": stats,
        }))
        .into_response(),
        Err(e) => {
            warn!(target: "relay.health", error = %e, "Registry actor unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
                .into_response()
        }
    }
}

async fn readiness_handler(State(state): State<HealthRouterState>) -> StatusCode {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
