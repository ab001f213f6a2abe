//! Relay Service
//!
//! Session-scoped WebSocket relay for end-to-end encrypted screen sharing.
//!
//! # Servers
//!
//! - WebSocket relay for clients (default: 0.0.0.0:3000)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:3001)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect the PostgreSQL pool
//! 4. Spawn the registry actor
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Start the liveness sweeper and stats reporter
//! 7. Start the WebSocket server and mark ready
//! 8. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::secret::ExposeSecret;
use relay_service::actors::RegistryActorHandle;
use relay_service::collaborators::{JwtIdentityVerifier, PgStore};
use relay_service::config::{Config, LogFormat};
use relay_service::connection::CloseReason;
use relay_service::lifecycle::{Collaborators, LifecycleController};
use relay_service::observability::{
    health_router, init_metrics_recorder, spawn_stats_reporter, HealthState,
};
use relay_service::router::SessionRouter;
use relay_service::service::RelayService;
use relay_service::sweeper::spawn_liveness_sweeper;
use relay_service::transport::{relay_router, TransportState};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Timeout for the initial database connection.
const DB_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shutdown waits for admission side effects to finish.
const SIDE_EFFECT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between closing connections and stopping servers, so close
/// frames reach the wire.
const CLOSE_FLUSH_DELAY: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration comes first so the log format can be chosen
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    init_tracing(config.log_format);

    info!("Starting Relay Service");
    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        sweep_interval_seconds = config.sweep_interval_seconds,
        ping_interval_seconds = config.ping_interval_seconds,
        max_missed_pongs = config.max_missed_pongs,
        outbound_queue_size = config.outbound_queue_size,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(DB_CONNECT_TIMEOUT)
        .connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to database");
            e
        })?;
    info!("Database connection established");

    let shutdown_token = CancellationToken::new();

    // Initialize actor system
    let (registry, registry_task) = RegistryActorHandle::spawn(shutdown_token.child_token());
    info!("Registry actor started");

    let store = Arc::new(PgStore::new(pool.clone()));
    let collaborators = Collaborators {
        identity: Arc::new(JwtIdentityVerifier::new(
            &config.jwt_secret,
            config.jwt_clock_skew(),
        )),
        grants: store.clone(),
        sessions: store.clone(),
        audit: store,
    };
    let lifecycle = LifecycleController::new(registry.clone(), collaborators);
    let router = SessionRouter::new(registry.clone());
    let service = RelayService::new(lifecycle.clone(), router);

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app =
        health_router(Arc::clone(&health_state), registry.clone()).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let sweeper_task = spawn_liveness_sweeper(
        lifecycle.clone(),
        config.sweep_interval(),
        shutdown_token.child_token(),
    );
    let stats_task = spawn_stats_reporter(
        registry.clone(),
        config.stats_interval(),
        shutdown_token.child_token(),
    );

    // Start the relay listener
    let relay_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid relay bind address");
        format!("Invalid relay bind address: {e}")
    })?;
    let relay_listener = tokio::net::TcpListener::bind(relay_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %relay_addr, "Failed to bind relay server");
            format!("Failed to bind relay server to {relay_addr}: {e}")
        })?;

    let relay_app = relay_router(TransportState {
        service,
        settings: config.transport_settings(),
    });
    let relay_shutdown_token = shutdown_token.child_token();
    let relay_task = tokio::spawn(async move {
        info!(addr = %relay_addr, "Relay server starting");
        let server = axum::serve(relay_listener, relay_app).with_graceful_shutdown(async move {
            relay_shutdown_token.cancelled().await;
            info!("Relay server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Relay server failed");
        }
    });

    health_state.set_ready();
    info!("Relay Service running - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_not_ready();

    match registry.close_all(CloseReason::ServerShutdown).await {
        Ok(closed) => info!(closed, "Closed relay connections"),
        Err(e) => warn!(error = %e, "Failed to close relay connections"),
    }

    if !lifecycle.drain_side_effects(SIDE_EFFECT_DRAIN_TIMEOUT).await {
        warn!(
            pending = lifecycle.side_effects_in_flight(),
            "Side effects still pending at shutdown"
        );
    }

    tokio::time::sleep(CLOSE_FLUSH_DELAY).await;

    // Propagates to the registry actor, servers, sweeper and stats reporter
    shutdown_token.cancel();

    for (name, task) in [
        ("registry", registry_task),
        ("sweeper", sweeper_task),
        ("stats", stats_task),
        ("relay", relay_task),
        ("health", health_task),
    ] {
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            warn!(task = name, "Task did not stop in time");
        }
    }

    pool.close().await;
    info!("Relay Service shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "relay_service=debug,tower_http=debug".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
