use lookout_compute::{DetectError, SourceError};
use lookout_core::{CoreError, JobId, Minutes};
use lookout_queue::QueueError;
use lookout_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("data source error: {0}")]
    Source(#[from] SourceError),

    #[error("detection error: {0}")]
    Detect(#[from] DetectError),

    #[error("job {0} has an instant frequency and cannot be scheduled")]
    NotSchedulable(JobId),

    #[error("job {0} has no effective query time")]
    MissingSchedule(JobId),

    #[error("backfill range ({start}, {end}] for job {job_id} is shorter than one bucket")]
    BackfillRange {
        job_id: JobId,
        start: Minutes,
        end: Minutes,
    },

    #[error("detection task panicked: {0}")]
    Panicked(String),

    #[error("worker pool error: {0}")]
    Pool(String),
}

impl SchedulerError {
    pub fn is_not_found(&self) -> bool {
        match self {
            SchedulerError::Queue(QueueError::NotFound(_)) => true,
            SchedulerError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Store or source failures a later attempt may get past.
    pub fn is_transient(&self) -> bool {
        match self {
            SchedulerError::Queue(e) => e.is_transient(),
            SchedulerError::Store(e) => e.is_transient(),
            SchedulerError::Source(e) => e.is_transient(),
            _ => false,
        }
    }
}
