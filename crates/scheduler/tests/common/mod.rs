#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lookout_compute::{
    DataSource, DetectError, DetectionOutcome, DetectionRequest, Detector, QueryInterval,
    SourceError,
};
use lookout_core::{
    AnomalyReport, Cluster, Config, DataPoint, Dataset, Job, JobId, JobStatus, MetricMeta,
    ReportStatus, TimeSeries,
};
use lookout_notify::ReportMailer;
use lookout_queue::{JobQueue, MemoryJobQueue};
use lookout_scheduler::{Collaborators, FixedClock, SchedulerService};
use lookout_storage::{MemoryStore, ReportAccessor, StoreError};
use tokio::sync::Notify;

pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

// ── Data source ────────────────────────────────────────────────────

/// Blocks a fetch until released, announcing that it got there.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Source returning one flat series, with per-job failure and stop hooks.
pub struct ScriptedSource {
    pub calls: AtomicUsize,
    pub failing: Mutex<HashSet<JobId>>,
    /// Jobs unscheduled from the queue while their fetch is running.
    pub stop_on_fetch: Mutex<HashSet<JobId>>,
    pub gate: Mutex<Option<Gate>>,
    queue: Arc<MemoryJobQueue>,
}

impl ScriptedSource {
    pub fn new(queue: Arc<MemoryJobQueue>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            stop_on_fetch: Mutex::new(HashSet::new()),
            gate: Mutex::new(None),
            queue,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn fetch(
        &self,
        job: &Job,
        _cluster: &Cluster,
        interval: QueryInterval,
    ) -> Result<Dataset, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.stop_on_fetch.lock().unwrap().contains(&job.job_id) {
            self.queue.unschedule(job.job_id).await.unwrap();
        }
        if self.failing.lock().unwrap().contains(&job.job_id) {
            return Err(SourceError::Status { status: 500, body: "broker down".to_string() });
        }

        let step = job.granularity.minutes();
        let first = interval.start - interval.start.rem_euclid(step) + step;
        let points = (0..)
            .map(|k| first + k * step)
            .take_while(|t| *t <= interval.end)
            .map(|time| DataPoint { time, value: 1.0 })
            .collect();
        let meta = MetricMeta { id: "requests".to_string(), name: "requests".to_string(), source: String::new() };
        Ok(vec![TimeSeries::new(meta, points)])
    }
}

// ── Detector ───────────────────────────────────────────────────────

pub type Verdict =
    dyn Fn(&DetectionRequest<'_>) -> Result<DetectionOutcome, DetectError> + Send + Sync;

pub struct ScriptedDetector(pub Box<Verdict>);

impl ScriptedDetector {
    /// Every series clean.
    pub fn clean() -> Self {
        Self(Box::new(|_| Ok(DetectionOutcome::Anomalies(Vec::new()))))
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(&self, request: &DetectionRequest<'_>) -> Result<DetectionOutcome, DetectError> {
        (self.0)(request)
    }
}

// ── Mailer and report store ────────────────────────────────────────

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, Vec<ReportStatus>)>>,
}

#[async_trait]
impl ReportMailer for RecordingMailer {
    async fn send(&self, to: &str, reports: &[AnomalyReport]) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), reports.iter().map(|r| r.status).collect()));
        true
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}

/// Report accessor counting batch writes.
pub struct CountingReports {
    pub inner: Arc<MemoryStore>,
    pub batches: AtomicUsize,
}

impl CountingReports {
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportAccessor for CountingReports {
    async fn put_reports(&self, reports: &[AnomalyReport]) -> Result<(), StoreError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.inner.put_reports(reports).await
    }

    async fn reports_for_job(&self, job_id: JobId) -> Result<Vec<AnomalyReport>, StoreError> {
        self.inner.reports_for_job(job_id).await
    }

    async fn delete_reports_for_job(&self, job_id: JobId) -> Result<usize, StoreError> {
        self.inner.delete_reports_for_job(job_id).await
    }
}

// ── World ──────────────────────────────────────────────────────────

pub struct World {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub reports: Arc<CountingReports>,
    pub source: Arc<ScriptedSource>,
    pub mailer: Arc<RecordingMailer>,
    pub clock: Arc<FixedClock>,
    pub service: Arc<SchedulerService>,
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.scheduler.execution_delay_secs = 1;
    config.scheduler.pending_grace_minutes = 5;
    config.scheduler.backfill_threads = 2;
    config.intervals.hours = 3;
    config.intervals.days = 3;
    config.email.enabled = true;
    config.email.failure_email = Some("oncall@example.com".to_string());
    config
}

pub fn world(jobs: Vec<Job>, now: DateTime<Utc>, detector: ScriptedDetector) -> World {
    let cluster = Cluster {
        cluster_id: 1,
        name: "primary".to_string(),
        broker_url: "http://127.0.0.1:9/query".to_string(),
        description: None,
    };
    let store = Arc::new(MemoryStore::seeded(jobs, vec![cluster]));
    let queue = Arc::new(MemoryJobQueue::new());
    let reports = Arc::new(CountingReports { inner: Arc::clone(&store), batches: AtomicUsize::new(0) });
    let source = Arc::new(ScriptedSource::new(Arc::clone(&queue)));
    let mailer = Arc::new(RecordingMailer::default());
    let clock = Arc::new(FixedClock::new(now));

    let collab = Collaborators {
        jobs: store.clone(),
        reports: reports.clone(),
        clusters: store.clone(),
        queue: queue.clone(),
        source: source.clone(),
        detector: Arc::new(detector),
        mailer: mailer.clone(),
    };
    let service = SchedulerService::new(collab, &config(), clock.clone()).unwrap();
    World { store, queue, reports, source, mailer, clock, service: Arc::new(service) }
}

/// A running job with an explicit schedule.
pub fn running_job(job: Job, query_time: i64, run_time: i64) -> Job {
    Job {
        status: JobStatus::Running,
        effective_query_time: Some(query_time),
        effective_run_time: Some(run_time),
        ..job
    }
}
