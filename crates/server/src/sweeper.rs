use std::sync::Arc;
use std::time::Duration;

use cloudpilot_agent::SessionStore;
use tokio::task::JoinHandle;
use tracing::info;

/// Periodically drops provisioning sessions nobody has touched for `max_idle`.
pub fn spawn(sessions: Arc<SessionStore>, max_idle: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = sessions.evict_idle(max_idle).await;
            if evicted > 0 {
                info!(
                    event_name = "system.sessions.evicted",
                    correlation_id = "sweeper",
                    evicted,
                    "idle provisioning sessions evicted"
                );
            }
        }
    })
}

/// Sweep often enough that a session outlives its idle budget by at most a tenth.
pub fn interval_for(max_idle: Duration) -> Duration {
    (max_idle / 10).clamp(Duration::from_secs(1), Duration::from_secs(300))
}
