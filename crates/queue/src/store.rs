//! Queue store trait and entry types.

use std::fmt;

use async_trait::async_trait;
use lookout_core::time::format_minutes;
use lookout_core::{JobId, Minutes};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// A job waiting in the queue, keyed by its due time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub due: Minutes,
}

impl QueueEntry {
    pub fn new(job_id: JobId, due: Minutes) -> Self {
        Self { job_id, due }
    }
}

impl fmt::Display for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} due {}", self.job_id, format_minutes(self.due))
    }
}

/// A job that has been popped but whose post-processing write has not
/// been confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub job_id: JobId,
    /// Due time the job had when it was popped.
    pub due: Minutes,
    /// Time of the pop.
    pub popped_at: Minutes,
}

/// Trait for queue store backends.
///
/// Every method is atomic with respect to every other: a concurrent
/// `pop_due` never observes half of a `push_batch`, and a job is never
/// both popped and still due.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Upsert one entry, superseding any existing entry for the job.
    async fn push(&self, entry: QueueEntry) -> Result<(), QueueError>;

    /// Upsert many entries in one atomic step.
    async fn push_batch(&self, entries: &[QueueEntry]) -> Result<(), QueueError>;

    /// Remove a job's entry. Returns [`QueueError::NotFound`] if absent.
    async fn remove(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Remove every listed job that is queued; returns how many were removed.
    async fn remove_batch(&self, job_ids: &[JobId]) -> Result<usize, QueueError>;

    /// Remove the queue entry and the pending marker together.
    ///
    /// Returns [`QueueError::NotFound`] only if neither existed.
    async fn unschedule(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Pop the earliest entry due at or before `now` and mark it pending.
    ///
    /// Returns `Ok(None)` when nothing is due.
    async fn pop_due(&self, now: Minutes) -> Result<Option<QueueEntry>, QueueError>;

    /// Drop the pending marker once the job's post-processing is durable.
    /// Returns whether a marker existed.
    async fn clear_pending(&self, job_id: JobId) -> Result<bool, QueueError>;

    /// Push `entry` and drop the job's pending marker in one step, but only
    /// while the marker still exists. Returns `false` without pushing when the
    /// job was unscheduled after it was popped.
    async fn requeue_pending(&self, entry: QueueEntry) -> Result<bool, QueueError>;

    /// Every queued entry, latest due time first.
    async fn list_all(&self) -> Result<Vec<QueueEntry>, QueueError>;

    /// Number of entries due at or before `now`, without mutation.
    async fn count_due(&self, now: Minutes) -> Result<usize, QueueError>;

    /// Current pending markers.
    async fn pending(&self) -> Result<Vec<PendingEntry>, QueueError>;

    /// Re-queue pending jobs popped at or before `now - grace` that have no
    /// queue entry of their own, at their original due time. Markers of jobs
    /// that were re-pushed meanwhile are simply dropped. Returns the ids that
    /// were re-queued.
    async fn reconcile_pending(&self, now: Minutes, grace: Minutes) -> Result<Vec<JobId>, QueueError>;

    /// Empty both the queue and the pending set.
    async fn clear_all(&self) -> Result<(), QueueError>;
}
