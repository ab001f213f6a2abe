//! Periodic registry stats reporter.

use crate::actors::RegistryActorHandle;
use crate::observability::metrics;

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Default reporting interval.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn a task that logs registry counts and publishes them as gauges every
/// `interval` until `cancel_token` fires.
pub fn spawn_stats_reporter(
    registry: RegistryActorHandle,
    interval: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_stats_reporter(registry, interval, cancel_token))
}

#[instrument(skip_all, name = "relay.stats")]
async fn run_stats_reporter(
    registry: RegistryActorHandle,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            _ = ticker.tick() => match registry.stats().await {
                Ok(stats) => {
                    metrics::set_registry_stats(stats);
                    let mailbox = registry.mailbox();
                    info!(
                        target: "relay.stats",
                        sessions = stats.sessions,
                        hosts = stats.hosts,
                        guests = stats.guests,
                        mailbox_peak = mailbox.peak_depth(),
                        messages_processed = mailbox.messages_processed(),
                        "Relay stats"
                    );
                }
                Err(e) => {
                    warn!(target: "relay.stats", error = %e, "Failed to read registry stats");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_on_cancel() {
        let (registry, _actor) = RegistryActorHandle::spawn(CancellationToken::new());
        let cancel = CancellationToken::new();
        let task = spawn_stats_reporter(registry, Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reporter should stop after cancel")
            .unwrap();
    }
}
