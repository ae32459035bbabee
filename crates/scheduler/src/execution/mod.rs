//! Single-job execution: fetch, detect, persist reports, notify.
//!
//! A failure anywhere on the fetch/detect path is terminal for the job until
//! it is relaunched: the job moves to `ERROR`, loses its queue entry and an
//! `ERROR` report is stored. Store failures are not job failures and
//! propagate to the caller.

mod backfill;

pub use backfill::BackfillOutcome;

use std::sync::Arc;

use lookout_compute::{DataSource, DetectionOutcome, DetectionRequest, Detector, QueryInterval};
use lookout_core::config::{EmailConfig, IntervalConfig};
use lookout_core::time::format_minutes;
use lookout_core::{AnomalyReport, Config, Dataset, Job, JobStatus, Minutes, ReportStatus};
use lookout_notify::ReportMailer;
use lookout_queue::{JobQueue, QueueError};
use lookout_storage::{ClusterAccessor, JobAccessor, ReportAccessor};
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;

/// Everything execution and dispatch talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobAccessor>,
    pub reports: Arc<dyn ReportAccessor>,
    pub clusters: Arc<dyn ClusterAccessor>,
    pub queue: Arc<dyn JobQueue>,
    pub source: Arc<dyn DataSource>,
    pub detector: Arc<dyn Detector>,
    pub mailer: Arc<dyn ReportMailer>,
}

/// What one `execute` call did to the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Detection ran. `anomalous` of the stored `reports` flag an anomaly.
    Completed { reports: usize, anomalous: usize },
    /// The source had nothing for the window.
    NoData,
    /// The job moved to `ERROR` and was unscheduled.
    Failed(String),
}

pub struct ExecutionService {
    collab: Collaborators,
    intervals: IntervalConfig,
    email: EmailConfig,
    /// Worker pool for backfill fan-out.
    pool: Arc<rayon::ThreadPool>,
}

impl ExecutionService {
    pub fn new(collab: Collaborators, config: &Config) -> Result<Self, SchedulerError> {
        let threads = config.scheduler.resolved_backfill_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("lookout-backfill-{i}"))
            .build()
            .map_err(|e| SchedulerError::Pool(e.to_string()))?;
        debug!(threads, "Built backfill pool");
        Ok(Self {
            collab,
            intervals: config.intervals.clone(),
            email: config.email.clone(),
            pool: Arc::new(pool),
        })
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    /// Buckets of history fetched ahead of every tested window.
    fn lookback(&self, job: &Job) -> u32 {
        job.granularity.intervals(&self.intervals)
    }

    /// Run detection for the job's current query time and store the reports.
    ///
    /// Updates `job.status` in place (`NODATA`, back to `RUNNING`, or
    /// `ERROR`). Only the error path persists the job; the caller owns the
    /// write of the rescheduled record.
    pub async fn execute(&self, job: &mut Job) -> Result<ExecutionOutcome, SchedulerError> {
        let query_time = job
            .effective_query_time
            .ok_or(SchedulerError::MissingSchedule(job.job_id))?;

        let detected = match self.run_detection(job, query_time).await {
            Err(e @ SchedulerError::Store(_)) if e.is_transient() => return Err(e),
            other => other,
        };

        match detected {
            Ok(DetectionOutcome::NoData) => {
                if job.status == JobStatus::Running {
                    job.status = JobStatus::NoData;
                }
                let report = AnomalyReport::singleton(job, ReportStatus::NoData, None, query_time);
                self.collab.reports.put_reports(&[report]).await?;
                info!(
                    job_id = job.job_id,
                    query_time = %format_minutes(query_time),
                    "No data for window"
                );
                Ok(ExecutionOutcome::NoData)
            }
            Ok(DetectionOutcome::Anomalies(anomalies)) => {
                if job.status == JobStatus::NoData {
                    job.status = JobStatus::Running;
                }
                let mut reports: Vec<AnomalyReport> = anomalies
                    .iter()
                    .filter(|a| a.has_anomaly())
                    .map(|a| AnomalyReport::from_anomaly(a, job, query_time))
                    .collect();
                let anomalous = reports.len();
                if reports.is_empty() {
                    reports.push(AnomalyReport::singleton(job, ReportStatus::Success, None, query_time));
                }
                self.collab.reports.put_reports(&reports).await?;
                info!(
                    job_id = job.job_id,
                    query_time = %format_minutes(query_time),
                    series = anomalies.len(),
                    anomalous,
                    "Job executed"
                );
                if anomalous > 0 {
                    self.notify_owner(job, &reports).await;
                }
                Ok(ExecutionOutcome::Completed { reports: reports.len(), anomalous })
            }
            Err(e) => {
                self.fail_job(job, query_time, &e).await?;
                Ok(ExecutionOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Fetch `(query_time - lookback, query_time]` and detect over its last
    /// `granularity_range` buckets.
    async fn run_detection(
        &self,
        job: &Job,
        query_time: Minutes,
    ) -> Result<DetectionOutcome, SchedulerError> {
        let cluster = self.collab.clusters.get_cluster(job.cluster_id).await?;
        let history = job.granularity.minutes() * i64::from(self.lookback(job));
        let interval = QueryInterval { start: query_time - history, end: query_time };
        let detection_job = job.copy_for_detection();
        let dataset = self.collab.source.fetch(&detection_job, &cluster, interval).await?;
        detect_blocking(Arc::clone(&self.collab.detector), detection_job, dataset, query_time).await
    }

    /// Terminal failure: `ERROR` status persisted, job unscheduled, one
    /// `ERROR` report stored and sent to the failure address.
    async fn fail_job(
        &self,
        job: &mut Job,
        query_time: Minutes,
        cause: &SchedulerError,
    ) -> Result<(), SchedulerError> {
        error!(job_id = job.job_id, error = %cause, "Job execution failed; unscheduling");
        if let Err(e) = job.status.transition(JobStatus::Error) {
            warn!(job_id = job.job_id, error = %e, "Forcing job into ERROR");
            job.status = JobStatus::Error;
        }
        // Status first: an unscheduled job must never be left looking runnable.
        // A job halted or deleted meanwhile keeps what the operator set.
        if self.collab.jobs.put_job_if_dispatchable(job).await? {
            match self.collab.queue.unschedule(job.job_id).await {
                Ok(()) | Err(QueueError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            info!(job_id = job.job_id, "Job halted during failing run; status left as set");
        }

        let report = AnomalyReport::singleton(job, ReportStatus::Error, None, query_time);
        self.collab.reports.put_reports(std::slice::from_ref(&report)).await?;
        self.notify_failure(job, &report).await;
        Ok(())
    }

    async fn notify_owner(&self, job: &Job, reports: &[AnomalyReport]) {
        if !self.email.enabled || job.owner_emails().is_empty() {
            return;
        }
        if !self.collab.mailer.send(&job.owner_email, reports).await {
            warn!(job_id = job.job_id, channel = self.collab.mailer.channel_name(), "Owner mail not delivered");
        }
    }

    async fn notify_failure(&self, job: &Job, report: &AnomalyReport) {
        let Some(to) = self.email.failure_email.as_deref().filter(|_| self.email.enabled) else {
            return;
        };
        if !self.collab.mailer.send(to, std::slice::from_ref(report)).await {
            warn!(job_id = job.job_id, channel = self.collab.mailer.channel_name(), "Failure mail not delivered");
        }
    }
}

/// Run the synchronous detector off the async runtime.
async fn detect_blocking(
    detector: Arc<dyn Detector>,
    job: Job,
    dataset: Dataset,
    window_end: Minutes,
) -> Result<DetectionOutcome, SchedulerError> {
    let outcome = tokio::task::spawn_blocking(move || {
        let request = DetectionRequest::new(&job, &dataset, window_end);
        detector.detect(&request)
    })
    .await
    .map_err(|e| SchedulerError::Panicked(e.to_string()))??;
    Ok(outcome)
}
