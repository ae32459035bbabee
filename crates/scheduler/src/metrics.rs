use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dispatch::TickSummary;

/// Dispatch loop counters, readable through the scheduler service.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Ticks that drained the queue.
    pub ticks_run: u64,
    /// Ticks that found a previous tick still in flight.
    pub ticks_skipped: u64,
    pub jobs_executed: u64,
    pub jobs_backfilled: u64,
    pub zombies: u64,
    /// Popped jobs whose processing failed and were left to reconciliation.
    pub job_failures: u64,
    /// Jobs re-queued by pending reconciliation.
    pub requeued_pending: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_tick_duration: Option<Duration>,
    pub avg_tick_duration: Duration,
}

impl SchedulerMetrics {
    /// Fold one tick into the counters.
    pub fn record_tick(&mut self, summary: &TickSummary, duration: Duration) {
        if summary.skipped {
            self.ticks_skipped += 1;
            return;
        }
        self.ticks_run += 1;
        self.jobs_executed += summary.executed as u64;
        self.jobs_backfilled += summary.backfilled as u64;
        self.zombies += summary.zombies as u64;
        self.job_failures += summary.failures as u64;
        self.requeued_pending += summary.requeued as u64;
        self.last_tick = Some(Utc::now());
        self.last_tick_duration = Some(duration);

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_tick_duration = if self.ticks_run == 1 {
            duration
        } else {
            let prev_nanos = self.avg_tick_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.ticks_run as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }
}
