//! Catch-up detection over a historical range.
//!
//! The range is fetched once, cut into granularity-sized windows and every
//! window is detected on the backfill pool. All windows are joined before
//! the combined batch is stored, so storage sees either every window's
//! reports or none.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use lookout_compute::{
    fetch_interval, slice_windows, window_ends, DetectionOutcome, DetectionRequest, Detector,
    WindowSlice,
};
use lookout_core::time::{format_minutes, MINUTES_IN_HOUR};
use lookout_core::{AnomalyReport, Job, Minutes, ReportStatus};
use rayon::prelude::*;
use tracing::{info, warn};

use super::ExecutionService;
use crate::error::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillOutcome {
    /// Windows detected; each contributes exactly one report group.
    pub windows: usize,
    /// Windows that degraded to an `ERROR` report.
    pub failed: usize,
    /// Reports stored in the single batch.
    pub reports: usize,
}

struct WindowReports {
    reports: Vec<AnomalyReport>,
    failed: bool,
}

impl ExecutionService {
    /// Detect every whole bucket between `start` and the newest bucket whose
    /// data is published at `now`, storing all reports in one batch.
    pub async fn backfill_from_window(
        &self,
        job: &Job,
        start: Minutes,
        now: Minutes,
    ) -> Result<BackfillOutcome, SchedulerError> {
        let granularity = job.granularity;
        let range_start = granularity.floor_minutes(start);
        let range_end =
            granularity.floor_minutes(now - i64::from(job.hours_of_lag) * MINUTES_IN_HOUR);
        if range_end - range_start < granularity.minutes() {
            return Err(SchedulerError::BackfillRange {
                job_id: job.job_id,
                start: range_start,
                end: range_end,
            });
        }

        let lookback = self.lookback(job);
        let cluster = self.collab.clusters.get_cluster(job.cluster_id).await?;
        let interval = fetch_interval(range_start, range_end, granularity, lookback);
        let detection_job = job.copy_for_detection();

        let fetched = self.collab.source.fetch(&detection_job, &cluster, interval).await;
        let windows: Vec<WindowReports> = match fetched {
            Ok(dataset) => {
                let slices = slice_windows(&dataset, range_start, range_end, granularity, lookback);
                let detector = Arc::clone(&self.collab.detector);
                let pool = Arc::clone(&self.pool);
                tokio::task::spawn_blocking(move || {
                    pool.install(|| {
                        slices
                            .par_iter()
                            .map(|slice| detect_window(detector.as_ref(), &detection_job, slice))
                            .collect::<Vec<_>>()
                    })
                })
                .await
                .map_err(|e| SchedulerError::Panicked(e.to_string()))?
            }
            Err(e) => {
                warn!(
                    job_id = job.job_id,
                    error = %e,
                    "Backfill fetch failed; every window degrades to ERROR"
                );
                window_ends(range_start, range_end, granularity)
                    .into_iter()
                    .map(|end| WindowReports {
                        reports: vec![AnomalyReport::singleton(job, ReportStatus::Error, None, end)],
                        failed: true,
                    })
                    .collect()
            }
        };

        let failed = windows.iter().filter(|w| w.failed).count();
        let reports: Vec<AnomalyReport> = windows.iter().flat_map(|w| w.reports.iter().cloned()).collect();
        self.collab.reports.put_reports(&reports).await?;

        info!(
            job_id = job.job_id,
            from = %format_minutes(range_start),
            to = %format_minutes(range_end),
            windows = windows.len(),
            failed,
            reports = reports.len(),
            "Backfill complete"
        );
        Ok(BackfillOutcome { windows: windows.len(), failed, reports: reports.len() })
    }
}

/// Detect one window. Errors and panics stay inside the window.
fn detect_window(detector: &dyn Detector, job: &Job, slice: &WindowSlice) -> WindowReports {
    let end = slice.window_end;
    let single = |status| vec![AnomalyReport::singleton(job, status, None, end)];
    let request = DetectionRequest::new(job, &slice.dataset, end);

    match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(&request))) {
        Ok(Ok(DetectionOutcome::NoData)) => WindowReports { reports: single(ReportStatus::NoData), failed: false },
        Ok(Ok(DetectionOutcome::Anomalies(anomalies))) => {
            let reports: Vec<AnomalyReport> = anomalies
                .iter()
                .filter(|a| a.has_anomaly())
                .map(|a| AnomalyReport::from_anomaly(a, job, end))
                .collect();
            let reports = if reports.is_empty() { single(ReportStatus::Success) } else { reports };
            WindowReports { reports, failed: false }
        }
        Ok(Err(e)) => {
            warn!(job_id = job.job_id, window_end = %format_minutes(end), error = %e, "Backfill window failed");
            WindowReports { reports: single(ReportStatus::Error), failed: true }
        }
        Err(_) => {
            warn!(job_id = job.job_id, window_end = %format_minutes(end), "Backfill window panicked");
            WindowReports { reports: single(ReportStatus::Error), failed: true }
        }
    }
}
