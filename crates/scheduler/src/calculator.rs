//! Pure schedule arithmetic over a job snapshot and the current time.
//!
//! Invariant kept by every function here:
//! `run_time = query_time + hours_of_lag * 60 + stagger(job_id)`.

use lookout_core::time::MINUTES_IN_HOUR;
use lookout_core::{Granularity, Job, Minutes};

use crate::error::SchedulerError;

/// Query and run time pair written back onto a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTimes {
    pub query_time: Minutes,
    pub run_time: Minutes,
}

impl ScheduleTimes {
    /// Both times moved forward by `minutes`.
    pub fn advanced(self, minutes: Minutes) -> Self {
        Self {
            query_time: self.query_time + minutes,
            run_time: self.run_time + minutes,
        }
    }

    pub fn apply_to(self, job: &mut Job) {
        job.effective_query_time = Some(self.query_time);
        job.effective_run_time = Some(self.run_time);
    }
}

/// Deterministic offset in `[0, 60)` minutes spreading same-frequency jobs
/// across the hour.
pub fn stagger(job_id: i64) -> Minutes {
    (job_id.unsigned_abs() % 60) as Minutes
}

fn lag_minutes(job: &Job) -> Minutes {
    i64::from(job.hours_of_lag) * MINUTES_IN_HOUR
}

fn cadence(job: &Job) -> Result<Granularity, SchedulerError> {
    job.frequency
        .granularity()
        .ok_or(SchedulerError::NotSchedulable(job.job_id))
}

/// First schedule for a job, anchored on `now`.
pub fn schedule_time(job: &Job, now: Minutes) -> Result<ScheduleTimes, SchedulerError> {
    let lag = lag_minutes(job);
    let query_time = cadence(job)?.floor_minutes(now - lag);
    Ok(ScheduleTimes {
        query_time,
        run_time: query_time + lag + stagger(job.job_id),
    })
}

/// Next schedule after a run: a fixed step of one frequency period from the
/// previous times. Falls back to [`schedule_time`] for a job that never ran.
pub fn reschedule_time(job: &Job, now: Minutes) -> Result<ScheduleTimes, SchedulerError> {
    let step = cadence(job)?.minutes();
    match (job.effective_query_time, job.effective_run_time) {
        (Some(query_time), Some(run_time)) => Ok(ScheduleTimes { query_time, run_time }.advanced(step)),
        _ => schedule_time(job, now),
    }
}

/// Query time implied by a run time, inverting the schedule invariant. Used for
/// queue entries whose job record lost its query time.
pub fn query_time_for_run(job: &Job, run_time: Minutes) -> Minutes {
    run_time - lag_minutes(job) - stagger(job.job_id)
}

/// A job is lagging when it missed its whole next occurrence:
/// `now > run_time + frequency`. `now == run_time + frequency` is on time.
pub fn is_lagging(job: &Job, now: Minutes) -> bool {
    match job.effective_run_time {
        Some(run_time) => now > run_time + job.frequency.minutes(),
        None => false,
    }
}
