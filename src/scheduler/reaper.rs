use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::scheduler::Scheduler;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Spawn the periodic stale-worker sweep on the scheduler's task runtime.
pub fn spawn(scheduler: Scheduler) {
    let tasks = scheduler.tasks().clone();
    let token = tasks.token();
    tasks.spawn("worker-reaper", run(scheduler, token));
}

/// Sweep every refresh interval until `token` is cancelled.
///
/// Sweeps are skipped for the first staleness window after start so that
/// workers which have not polled since a restart are not reaped straight away.
async fn run(scheduler: Scheduler, token: CancellationToken) {
    let period = scheduler.config().refresh_interval().max(MIN_SWEEP_INTERVAL);
    let armed_at = Instant::now() + scheduler.config().stale_after();

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        period_ms = period.as_millis() as u64,
        grace_ms = scheduler.config().stale_after().as_millis() as u64,
        "Worker reaper started"
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                if Instant::now() < armed_at {
                    continue;
                }
                let reaped = scheduler.reap_stale_workers(Utc::now()).await;
                if reaped > 0 {
                    tracing::debug!(reaped, "Reaper sweep finished");
                }
            }
        }
    }

    tracing::info!("Worker reaper stopped");
}
