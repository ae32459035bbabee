//! The recurring poller that drains due jobs from the queue.
//!
//! Each popped job is either executed for its current window (on time) or
//! backfilled over the span it missed and moved to a catch-up schedule
//! (lagging). A lagging job that cannot be caught up in a single advance
//! becomes a `ZOMBIE`. The pending marker of a job is cleared only after its
//! new queue entry or terminal status has been written.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lookout_core::time::format_minutes;
use lookout_core::{Job, JobStatus, Minutes};
use lookout_queue::QueueEntry;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::calculator::{is_lagging, query_time_for_run, reschedule_time, schedule_time, ScheduleTimes};
use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::execution::{ExecutionOutcome, ExecutionService};
use crate::metrics::SchedulerMetrics;
use crate::recoverable::PeriodicTask;

/// Counters for one dispatch tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub popped: usize,
    pub executed: usize,
    pub backfilled: usize,
    pub zombies: usize,
    /// Jobs whose processing failed; they stay pending until reconciled.
    pub failures: usize,
    /// Pending jobs re-queued at the start of the tick.
    pub requeued: usize,
    /// A previous tick was still running.
    pub skipped: bool,
}

impl TickSummary {
    pub fn skipped() -> Self {
        Self { skipped: true, ..Self::default() }
    }
}

/// How one popped job left the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Executed,
    Backfilled,
    Zombie,
    /// Executed into `ERROR`; not rescheduled.
    Errored,
    /// Record gone, stopped or terminal; marker cleared, nothing queued.
    Dropped,
}

/// Releases the in-flight flag even if the tick unwinds.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Dispatcher {
    exec: Arc<ExecutionService>,
    clock: Arc<dyn Clock>,
    /// Age after which a pending marker is considered abandoned.
    grace: Minutes,
    in_flight: AtomicBool,
    metrics: Arc<RwLock<SchedulerMetrics>>,
}

impl Dispatcher {
    pub fn new(
        exec: Arc<ExecutionService>,
        clock: Arc<dyn Clock>,
        grace: Minutes,
        metrics: Arc<RwLock<SchedulerMetrics>>,
    ) -> Self {
        Self { exec, clock, grace, in_flight: AtomicBool::new(false), metrics }
    }

    /// Run one tick. A tick that finds another still running returns a
    /// skipped summary without touching the queue.
    pub async fn tick(&self) -> Result<TickSummary, SchedulerError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Dispatch tick still in flight, skipping");
            let summary = TickSummary::skipped();
            self.record(&summary, Duration::ZERO);
            return Ok(summary);
        }
        let _guard = TickGuard(&self.in_flight);

        let started = Instant::now();
        let summary = self.drain().await?;
        self.record(&summary, started.elapsed());
        if summary.popped > 0 || summary.requeued > 0 {
            info!(
                popped = summary.popped,
                executed = summary.executed,
                backfilled = summary.backfilled,
                zombies = summary.zombies,
                failures = summary.failures,
                requeued = summary.requeued,
                "Dispatch tick complete"
            );
        }
        Ok(summary)
    }

    fn record(&self, summary: &TickSummary, duration: Duration) {
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.record_tick(summary, duration);
        }
    }

    async fn drain(&self) -> Result<TickSummary, SchedulerError> {
        let now = self.clock.now_minutes();
        let queue = &self.exec.collaborators().queue;

        let requeued = queue.reconcile_pending(now, self.grace).await?;
        let mut summary = TickSummary { requeued: requeued.len(), ..TickSummary::default() };

        while let Some(entry) = queue.pop_due(now).await? {
            summary.popped += 1;
            match self.process(entry, now).await {
                Ok(Disposition::Executed) => summary.executed += 1,
                Ok(Disposition::Backfilled) => summary.backfilled += 1,
                Ok(Disposition::Zombie) => summary.zombies += 1,
                Ok(Disposition::Errored) => summary.executed += 1,
                Ok(Disposition::Dropped) => {}
                Err(e) => {
                    summary.failures += 1;
                    error!(
                        job_id = entry.job_id,
                        error = %e,
                        transient = e.is_transient(),
                        "Failed to process due job; left pending for reconciliation"
                    );
                }
            }
        }
        Ok(summary)
    }

    async fn process(&self, entry: QueueEntry, now: Minutes) -> Result<Disposition, SchedulerError> {
        let collab = self.exec.collaborators();
        let job_id = entry.job_id;

        let mut job = match collab.jobs.get_job(job_id).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                warn!(job_id, "Popped job has no record; dropping");
                collab.queue.clear_pending(job_id).await?;
                return Ok(Disposition::Dropped);
            }
            Err(e) => return Err(e.into()),
        };
        if !job.status.is_dispatchable() {
            info!(job_id, status = %job.status, "Popped job is not runnable; dropping");
            collab.queue.clear_pending(job_id).await?;
            return Ok(Disposition::Dropped);
        }

        let run_time = *job.effective_run_time.get_or_insert(entry.due);
        if job.effective_query_time.is_none() {
            job.effective_query_time = Some(query_time_for_run(&job, run_time));
        }

        if is_lagging(&job, now) {
            self.catch_up(job, now).await
        } else {
            self.run_on_time(job, now).await
        }
    }

    /// Backfill the missed span, then move the job to the next schedule that
    /// is still ahead of `now`, or to `ZOMBIE` if one advance is not enough.
    async fn catch_up(&self, mut job: Job, now: Minutes) -> Result<Disposition, SchedulerError> {
        let collab = self.exec.collaborators();
        let start = job
            .report_nominal_time()
            .ok_or(SchedulerError::MissingSchedule(job.job_id))?;
        warn!(
            job_id = job.job_id,
            run_time = %job.effective_run_time.map(format_minutes).unwrap_or_default(),
            now = %format_minutes(now),
            "Job is lagging; backfilling missed span"
        );

        match self.exec.backfill_from_window(&job, start, now).await {
            Ok(outcome) => debug!(job_id = job.job_id, windows = outcome.windows, failed = outcome.failed, "Backfilled"),
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => warn!(job_id = job.job_id, error = %e, "Backfill skipped"),
        }

        let mut next = schedule_time(&job, now)?;
        if next.run_time <= now {
            next = next.advanced(job.frequency.minutes());
        }
        if next.run_time <= now {
            error!(
                job_id = job.job_id,
                next_run = %format_minutes(next.run_time),
                "Job cannot catch up; marking ZOMBIE"
            );
            if let Err(e) = job.status.transition(JobStatus::Zombie) {
                warn!(job_id = job.job_id, error = %e, "Forcing job into ZOMBIE");
                job.status = JobStatus::Zombie;
            }
            let written = collab.jobs.put_job_if_dispatchable(&job).await?;
            collab.queue.clear_pending(job.job_id).await?;
            if !written {
                info!(job_id = job.job_id, "Job halted during catch-up; keeping its status");
                return Ok(Disposition::Dropped);
            }
            return Ok(Disposition::Zombie);
        }

        self.commit(&mut job, next).await?;
        Ok(Disposition::Backfilled)
    }

    async fn run_on_time(&self, mut job: Job, now: Minutes) -> Result<Disposition, SchedulerError> {
        let collab = self.exec.collaborators();
        let outcome = self.exec.execute(&mut job).await?;
        if let ExecutionOutcome::Failed(_) = outcome {
            // Execution wrote ERROR and unscheduled the job, unless it was halted meanwhile.
            collab.queue.clear_pending(job.job_id).await?;
            return Ok(Disposition::Errored);
        }

        let next = reschedule_time(&job, now)?;
        self.commit(&mut job, next).await?;
        Ok(Disposition::Executed)
    }

    /// Persist the new schedule, then swap the pending marker for a queue
    /// entry. The record is written only while it is still dispatchable, so
    /// a halt or delete issued during processing wins; a marker removed
    /// meanwhile means the job was stopped.
    async fn commit(&self, job: &mut Job, next: ScheduleTimes) -> Result<(), SchedulerError> {
        let collab = self.exec.collaborators();
        next.apply_to(job);
        if !collab.jobs.put_job_if_dispatchable(job).await? {
            info!(job_id = job.job_id, "Job halted or deleted during processing; not rescheduling");
            collab.queue.clear_pending(job.job_id).await?;
            return Ok(());
        }
        let entry = QueueEntry::new(job.job_id, next.run_time);
        if collab.queue.requeue_pending(entry).await? {
            debug!(job_id = job.job_id, next_run = %format_minutes(next.run_time), "Rescheduled");
        } else {
            info!(job_id = job.job_id, "Job unscheduled during processing; not requeued");
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for Dispatcher {
    fn name(&self) -> &str {
        "dispatch"
    }

    async fn run(&self) -> Result<(), SchedulerError> {
        self.tick().await.map(|_| ())
    }
}
