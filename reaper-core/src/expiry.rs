use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::*;

use crate::bans::BanRegistry;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic trigger for dropping expired bans. A failed sweep is logged and
/// the loop carries on; only the shutdown signal ends it.
pub async fn run_expiry_sweeper(registry: Arc<BanRegistry>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // consume the immediate first tick
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => (),
            _ = shutdown.changed() => break,
        }

        match registry.expire(Utc::now()).await {
            Ok(0) => (),
            Ok(count) => debug!(count, "Expiry sweep dropped bans"),
            Err(error) => warn!(?error, "Ban expiry sweep failed"),
        }
    }
    debug!("Expiry sweeper stopped");
}
