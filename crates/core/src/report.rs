//! Anomaly reports produced by job execution.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::granularity::Frequency;
use crate::job::{Job, JobId};
use crate::series::{Anomaly, AnomalyInterval, MetricMeta};
use crate::time::Minutes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    /// Detection ran and found nothing.
    Success,
    /// The source returned no data for the window.
    NoData,
    /// Query or detection failed.
    Error,
    /// At least one anomalous interval was found.
    Anomaly,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportStatus::Success => "SUCCESS",
            ReportStatus::NoData => "NODATA",
            ReportStatus::Error => "ERROR",
            ReportStatus::Anomaly => "ANOMALY",
        };
        f.write_str(s)
    }
}

/// Reports sharing a key replace each other when stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReportGroupKey {
    pub job_id: JobId,
    pub query_end_time: Minutes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub report_id: Uuid,
    pub job_id: JobId,
    pub frequency: Frequency,
    pub status: ReportStatus,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default)]
    pub group_by_filters: Option<String>,
    #[serde(default)]
    pub intervals: Vec<AnomalyInterval>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub deviation: Option<String>,
    #[serde(default)]
    pub query_url: Option<String>,
    /// End of the data window this report covers.
    pub query_end_time: Minutes,
}

impl AnomalyReport {
    /// Report for one detector verdict.
    pub fn from_anomaly(anomaly: &Anomaly, job: &Job, query_end_time: Minutes) -> Self {
        let status = if anomaly.has_anomaly() {
            ReportStatus::Anomaly
        } else {
            ReportStatus::Success
        };
        Self {
            report_id: Uuid::new_v4(),
            job_id: job.job_id,
            frequency: job.frequency,
            status,
            unique_id: Some(anomaly.meta.id.clone()),
            metric_name: Some(anomaly.meta.name.clone()),
            group_by_filters: Some(anomaly.meta.source.clone()),
            intervals: anomaly.intervals.clone(),
            model_name: Some(anomaly.model.clone()),
            deviation: anomaly.deviation.clone(),
            query_url: job.url.clone(),
            query_end_time,
        }
    }

    /// Placeholder report used when a window produced no anomaly reports:
    /// a clean run, a run without source data, or a failed run.
    pub fn singleton(
        job: &Job,
        status: ReportStatus,
        meta: Option<&MetricMeta>,
        query_end_time: Minutes,
    ) -> Self {
        Self {
            report_id: Uuid::new_v4(),
            job_id: job.job_id,
            frequency: job.frequency,
            status,
            unique_id: meta.map(|m| m.id.clone()),
            metric_name: meta.map(|m| m.name.clone()),
            group_by_filters: meta.map(|m| m.source.clone()),
            intervals: Vec::new(),
            model_name: None,
            deviation: None,
            query_url: job.url.clone(),
            query_end_time,
        }
    }

    pub fn has_anomaly(&self) -> bool {
        self.status == ReportStatus::Anomaly
    }

    pub fn group_key(&self) -> ReportGroupKey {
        ReportGroupKey {
            job_id: self.job_id,
            query_end_time: self.query_end_time,
        }
    }
}
