use crate::flexgraph_logic::state::AppState;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Whether no record has been accepted for longer than `threshold`.
///
/// Before the first record, the silence is measured from `started`.
pub fn is_stalled(
    last_accepted: Option<DateTime<Utc>>,
    started: DateTime<Utc>,
    now: DateTime<Utc>,
    threshold: TimeDelta,
) -> bool {
    now - last_accepted.unwrap_or(started) > threshold
}

pub async fn run(app_state: AppState, check_every: Duration, threshold: Duration, shutdown: CancellationToken) {
    let mut check_interval = interval(check_every);
    let threshold = TimeDelta::from_std(threshold).unwrap_or(TimeDelta::MAX);
    let clock = app_state.registry.clock();
    let started = clock.now();
    let mut stalled = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Monitor service received shutdown signal.");
                break;
            }
            _ = check_interval.tick() => {
                if app_state.registry.is_empty() {
                    continue;
                }
                let last = app_state.metrics.last_accepted();
                if is_stalled(last, started, clock.now(), threshold) {
                    warn!(
                        last_accepted = ?last,
                        threshold_secs = threshold.num_seconds(),
                        instruments = app_state.registry.len(),
                        "No new records accepted; store may be stalled"
                    );
                    stalled = true;
                } else if stalled {
                    info!("Dataflow resumed");
                    stalled = false;
                }
            }
        }
    }
}
