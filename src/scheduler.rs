//! Periodic refresh of the metric store.
//!
//! Runs one refresh immediately, then keeps a steady cadence: each cycle
//! sleeps for whatever is left of the interval after the scan itself. A scan
//! that overruns the interval is followed immediately by the next one.

use crate::metrics::{MetricStore, ScanContext};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Phase of the refresh loop, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// The unconditional first refresh at startup.
    Warmup,
    Running,
}

pub struct Scheduler {
    store: Arc<MetricStore>,
    ctx: ScanContext,
    interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<MetricStore>,
        ctx: ScanContext,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            ctx,
            interval,
            cancel,
        }
    }

    /// Refresh until the cancellation token fires.
    ///
    /// Cancellation is observed both while a scan is in flight and while
    /// sleeping between scans.
    pub async fn run(self) {
        let mut state = SchedulerState::Warmup;
        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            storage = %self.ctx.storage.root().display(),
            "scheduler starting"
        );

        loop {
            let start = Instant::now();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.store.refresh_all(&self.ctx) => {}
            }
            let elapsed = start.elapsed();
            let sleep_for = sleep_duration(self.interval, elapsed);

            if elapsed > self.interval {
                tracing::warn!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    interval_secs = self.interval.as_secs_f64(),
                    "scan took longer than the update interval"
                );
            }
            tracing::info!(
                state = ?state,
                cycle = self.store.completed_cycles(),
                elapsed_ms = elapsed.as_millis() as u64,
                next_in_ms = sleep_for.as_millis() as u64,
                "metrics refreshed"
            );
            state = SchedulerState::Running;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        tracing::info!(state = ?state, "scheduler stopped");
    }
}

/// Time left in the interval after a scan that took `elapsed`. Never negative.
pub fn sleep_duration(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}
