//! Periodic liveness sweep.
//!
//! Backstop for transports that vanished without a close reaching the
//! reader (half-open TCP, a writer that died). The transport keepalive is
//! the primary path; the sweep evicts whatever it missed.

use crate::lifecycle::LifecycleController;

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the sweeper. The first sweep runs one `interval` after start.
pub fn spawn_liveness_sweeper(
    lifecycle: LifecycleController,
    interval: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_sweeper(lifecycle, interval, cancel_token))
}

#[instrument(skip_all, name = "relay.sweeper", fields(interval_secs = interval.as_secs()))]
async fn run_sweeper(
    lifecycle: LifecycleController,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(target: "relay.sweeper", "Liveness sweeper started");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "relay.sweeper", "Liveness sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                match lifecycle.sweep_stale().await {
                    Ok(0) => {
                        debug!(target: "relay.sweeper", "Sweep found no stale connections");
                    }
                    Ok(evicted) => {
                        info!(target: "relay.sweeper", evicted, "Evicted stale connections");
                    }
                    Err(e) => {
                        warn!(target: "relay.sweeper", error = %e, "Sweep failed");
                    }
                }
            }
        }
    }
}
