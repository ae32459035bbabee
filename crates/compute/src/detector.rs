//! Detection capability contract.

use lookout_core::{Anomaly, Dataset, Job, Minutes};

use crate::error::DetectError;

/// Input of one detection call.
#[derive(Debug, Clone, Copy)]
pub struct DetectionRequest<'a> {
    pub job: &'a Job,
    pub dataset: &'a Dataset,
    /// End of the window under test. The tested buckets are the last
    /// `job.granularity_range` buckets ending here; earlier points form the
    /// baseline.
    pub window_end: Minutes,
}

impl<'a> DetectionRequest<'a> {
    pub fn new(job: &'a Job, dataset: &'a Dataset, window_end: Minutes) -> Self {
        Self { job, dataset, window_end }
    }

    /// First minute after which points belong to the tested window.
    pub fn window_start(&self) -> Minutes {
        self.window_end
            - self.job.granularity.minutes() * i64::from(self.job.granularity_range.max(1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// The source had no data for the window.
    NoData,
    /// One verdict per series; series without intervals are clean.
    Anomalies(Vec<Anomaly>),
}

impl DetectionOutcome {
    pub fn anomalous_count(&self) -> usize {
        match self {
            DetectionOutcome::NoData => 0,
            DetectionOutcome::Anomalies(a) => a.iter().filter(|a| a.has_anomaly()).count(),
        }
    }
}

/// Given a set of time series, decide which of them are anomalous.
///
/// Implementations are synchronous and may be CPU-bound; callers run them
/// off the async runtime.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, request: &DetectionRequest<'_>) -> Result<DetectionOutcome, DetectError>;
}
