//! Scheduling operations exposed to whatever manages jobs, plus the
//! lifecycle of the periodic dispatch and backup tasks.
//!
//! Queue and store failures propagate to the caller; refusing the request
//! is the caller's decision.


use std::sync::{Arc, RwLock};
use std::time::Duration;

use lookout_core::config::SchedulerSettings;
use lookout_core::time::format_minutes;
use lookout_core::{Config, Job, JobId, JobStatus, Minutes};
use lookout_queue::{QueueEntry, QueueError};
use tracing::{info, warn};

use crate::backup::BackupTask;
use crate::calculator::{reschedule_time, schedule_time};
use crate::clock::Clock;
use crate::dispatch::{Dispatcher, TickSummary};
use crate::error::SchedulerError;
use crate::execution::{Collaborators, ExecutionService};
use crate::metrics::SchedulerMetrics;
use crate::recoverable::{RecoverableExecutor, ResubmitPolicy};

const BACKUP_PERIOD: Duration = Duration::from_secs(60);

pub struct SchedulerService {
    collab: Collaborators,
    dispatcher: Arc<Dispatcher>,
    executor: RecoverableExecutor,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    metrics: Arc<RwLock<SchedulerMetrics>>,
}

impl SchedulerService {
    pub fn new(collab: Collaborators, config: &Config, clock: Arc<dyn Clock>) -> Result<Self, SchedulerError> {
        Self::with_executor(collab, config, clock, RecoverableExecutor::default())
    }

    /// Like [`SchedulerService::new`] with a custom resubmission policy for
    /// the periodic tasks.
    pub fn with_policy(
        collab: Collaborators,
        config: &Config,
        clock: Arc<dyn Clock>,
        policy: Arc<dyn ResubmitPolicy>,
    ) -> Result<Self, SchedulerError> {
        Self::with_executor(collab, config, clock, RecoverableExecutor::new(policy))
    }

    fn with_executor(
        collab: Collaborators,
        config: &Config,
        clock: Arc<dyn Clock>,
        executor: RecoverableExecutor,
    ) -> Result<Self, SchedulerError> {
        let exec = Arc::new(ExecutionService::new(collab.clone(), config)?);
        let metrics = Arc::new(RwLock::new(SchedulerMetrics::default()));
        let dispatcher = Arc::new(Dispatcher::new(
            exec,
            Arc::clone(&clock),
            config.scheduler.pending_grace_minutes,
            Arc::clone(&metrics),
        ));
        Ok(Self {
            collab,
            dispatcher,
            executor,
            clock,
            settings: config.scheduler.clone(),
            metrics,
        })
    }

    fn now(&self) -> Minutes {
        self.clock.now_minutes()
    }

    // ── Scheduling primitives ──────────────────────────────────────

    /// Compute the job's first schedule from now and queue it. The caller
    /// persists the updated job.
    pub async fn schedule_job(&self, job: &mut Job) -> Result<(), SchedulerError> {
        let times = schedule_time(job, self.now())?;
        times.apply_to(job);
        self.collab.queue.push(QueueEntry::new(job.job_id, times.run_time)).await?;
        info!(job_id = job.job_id, run_time = %format_minutes(times.run_time), "Scheduled job");
        Ok(())
    }

    /// Advance the job one frequency step from its last schedule and queue it.
    pub async fn reschedule_job(&self, job: &mut Job) -> Result<(), SchedulerError> {
        let times = reschedule_time(job, self.now())?;
        times.apply_to(job);
        self.collab.queue.push(QueueEntry::new(job.job_id, times.run_time)).await?;
        info!(job_id = job.job_id, run_time = %format_minutes(times.run_time), "Rescheduled job");
        Ok(())
    }

    /// Remove the job's queue entry and pending marker. An execution already
    /// in flight finishes but is not requeued.
    pub async fn stop_job(&self, job_id: JobId) -> Result<(), SchedulerError> {
        self.collab.queue.unschedule(job_id).await?;
        info!(job_id, "Stopped job");
        Ok(())
    }

    /// Drop the jobs' entries and queue fresh schedules for all of them in
    /// one batch. Nothing is touched if any job cannot be scheduled.
    pub async fn stop_and_reschedule(&self, jobs: &mut [Job]) -> Result<(), SchedulerError> {
        let now = self.now();
        let times = jobs
            .iter()
            .map(|job| schedule_time(job, now))
            .collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<JobId> = jobs.iter().map(|j| j.job_id).collect();
        let removed = self.collab.queue.remove_batch(&ids).await?;
        let entries: Vec<QueueEntry> = jobs
            .iter_mut()
            .zip(times)
            .map(|(job, t)| {
                t.apply_to(job);
                QueueEntry::new(job.job_id, t.run_time)
            })
            .collect();
        self.collab.queue.push_batch(&entries).await?;
        info!(jobs = entries.len(), removed, "Stopped and rescheduled jobs");
        Ok(())
    }

    // ── Job lifecycle ──────────────────────────────────────────────

    /// Set the job `RUNNING`, schedule it and persist it. The queue entry is
    /// withdrawn if the record cannot be written.
    pub async fn launch_job(&self, job_id: JobId) -> Result<Job, SchedulerError> {
        let mut job = self.collab.jobs.get_job(job_id).await?;
        job.status.transition(JobStatus::Running)?;
        self.schedule_job(&mut job).await?;
        if let Err(e) = self.collab.jobs.put_job(&job).await {
            warn!(job_id, error = %e, "Persisting launched job failed; withdrawing queue entry");
            match self.collab.queue.remove(job_id).await {
                Ok(()) | Err(QueueError::NotFound(_)) => {}
                Err(qe) => warn!(job_id, error = %qe, "Withdrawing queue entry failed"),
            }
            return Err(e.into());
        }
        info!(job_id, "Launched job");
        Ok(job)
    }

    /// Stop the job and persist it as `STOPPED`.
    pub async fn halt_job(&self, job_id: JobId) -> Result<Job, SchedulerError> {
        match self.stop_job(job_id).await {
            Err(e) if e.is_not_found() => {}
            other => other?,
        }
        let mut job = self.collab.jobs.get_job(job_id).await?;
        if job.status != JobStatus::Stopped {
            job.status.transition(JobStatus::Stopped)?;
            self.collab.jobs.put_job(&job).await?;
        }
        info!(job_id, "Halted job");
        Ok(job)
    }

    /// Stop the job, then delete its record and reports.
    pub async fn delete_job(&self, job_id: JobId) -> Result<(), SchedulerError> {
        match self.stop_job(job_id).await {
            Err(e) if e.is_not_found() => {}
            other => other?,
        }
        self.collab.jobs.delete_job(job_id).await?;
        let reports = self.collab.reports.delete_reports_for_job(job_id).await?;
        info!(job_id, reports, "Deleted job");
        Ok(())
    }

    /// Queued jobs, latest due first. Entries without a record are skipped.
    pub async fn queued_jobs(&self) -> Result<Vec<Job>, SchedulerError> {
        let entries = self.collab.queue.list_all().await?;
        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.collab.jobs.get_job(entry.job_id).await {
                Ok(job) => jobs.push(job),
                Err(e) if e.is_not_found() => warn!(job_id = entry.job_id, "Queued job has no record"),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(jobs)
    }

    pub async fn count_due(&self, now: Minutes) -> Result<usize, SchedulerError> {
        Ok(self.collab.queue.count_due(now).await?)
    }

    // ── Periodic tasks ─────────────────────────────────────────────

    /// Re-queue every pending marker left by a previous process, then
    /// register the dispatch loop and, if configured, the daily backup.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let requeued = self.collab.queue.reconcile_pending(self.now(), 0).await?;
        info!(requeued = requeued.len(), "Reconciled pending jobs");

        let period = Duration::from_secs(self.settings.execution_delay_secs.max(1));
        self.executor
            .schedule_at_fixed_rate(self.dispatcher.clone(), Duration::ZERO, period)?;

        if let Some(dir) = &self.settings.backup_path {
            let backup = BackupTask::new(
                Arc::clone(&self.collab.jobs),
                Arc::clone(&self.collab.clusters),
                Arc::clone(&self.collab.queue),
                Arc::clone(&self.clock),
                dir.clone(),
            );
            self.executor
                .schedule_at_fixed_rate(Arc::new(backup), Duration::ZERO, BACKUP_PERIOD)?;
        }
        info!(period_secs = period.as_secs(), "Scheduler started");
        Ok(())
    }

    /// Cancel the periodic tasks and wait for any in-flight tick.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.executor.is_registered("dispatch")
    }

    /// Run one dispatch tick now, outside the periodic schedule.
    pub async fn tick_now(&self) -> Result<TickSummary, SchedulerError> {
        self.dispatcher.tick().await
    }

    /// Snapshot of the dispatch metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        match self.metrics.read() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
