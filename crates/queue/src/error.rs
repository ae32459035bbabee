//! Queue error types.

use lookout_core::JobId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found in queue: {0}")]
    NotFound(JobId),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// Errors a caller may retry on a later tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}
