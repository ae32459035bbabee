use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown granularity: {0}")]
    UnknownGranularity(String),

    #[error("Unknown frequency: {0}")]
    UnknownFrequency(String),

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("Invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}
