//! In-process queue backend.
//!
//! A single mutex guards the ordered set, the per-job index and the pending
//! map, so every trait method is one critical section and therefore atomic
//! with respect to all the others.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use lookout_core::{JobId, Minutes};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::QueueError;
use crate::store::{JobQueue, PendingEntry, QueueEntry};

#[derive(Debug, Default)]
struct Inner {
    /// Ordered by `(due, job_id)` so ties pop in ascending id order.
    by_due: BTreeSet<(Minutes, JobId)>,
    due_of: HashMap<JobId, Minutes>,
    pending: HashMap<JobId, PendingEntry>,
}

impl Inner {
    fn upsert(&mut self, entry: QueueEntry) {
        if let Some(old) = self.due_of.insert(entry.job_id, entry.due) {
            self.by_due.remove(&(old, entry.job_id));
        }
        self.by_due.insert((entry.due, entry.job_id));
    }

    fn take(&mut self, job_id: JobId) -> Option<Minutes> {
        let due = self.due_of.remove(&job_id)?;
        self.by_due.remove(&(due, job_id));
        Some(due)
    }
}

/// Serializable image of the queue, used by the backup task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntry>,
    pub pending: Vec<PendingEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from a snapshot.
    pub fn from_snapshot(snapshot: QueueSnapshot) -> Self {
        let mut inner = Inner::default();
        for entry in snapshot.entries {
            inner.upsert(entry);
        }
        for p in snapshot.pending {
            inner.pending.insert(p.job_id, p);
        }
        Self { inner: Mutex::new(inner) }
    }

    pub fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        let inner = self.lock()?;
        let mut pending: Vec<_> = inner.pending.values().copied().collect();
        pending.sort_by_key(|p| p.job_id);
        Ok(QueueSnapshot {
            entries: inner
                .by_due
                .iter()
                .map(|&(due, job_id)| QueueEntry { job_id, due })
                .collect(),
            pending,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, QueueError> {
        self.inner
            .lock()
            .map_err(|e| QueueError::Unavailable(format!("queue lock poisoned: {e}")))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push(&self, entry: QueueEntry) -> Result<(), QueueError> {
        self.lock()?.upsert(entry);
        debug!(job_id = entry.job_id, due = entry.due, "Queued job");
        Ok(())
    }

    async fn push_batch(&self, entries: &[QueueEntry]) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        for &entry in entries {
            inner.upsert(entry);
        }
        debug!(count = entries.len(), "Queued job batch");
        Ok(())
    }

    async fn remove(&self, job_id: JobId) -> Result<(), QueueError> {
        match self.lock()?.take(job_id) {
            Some(_) => Ok(()),
            None => Err(QueueError::NotFound(job_id)),
        }
    }

    async fn remove_batch(&self, job_ids: &[JobId]) -> Result<usize, QueueError> {
        let mut inner = self.lock()?;
        Ok(job_ids.iter().filter(|&&id| inner.take(id).is_some()).count())
    }

    async fn unschedule(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let queued = inner.take(job_id).is_some();
        let pending = inner.pending.remove(&job_id).is_some();
        if queued || pending {
            Ok(())
        } else {
            Err(QueueError::NotFound(job_id))
        }
    }

    async fn pop_due(&self, now: Minutes) -> Result<Option<QueueEntry>, QueueError> {
        let mut inner = self.lock()?;
        let Some(&(due, job_id)) = inner.by_due.first() else {
            return Ok(None);
        };
        if due > now {
            return Ok(None);
        }
        inner.take(job_id);
        inner.pending.insert(job_id, PendingEntry { job_id, due, popped_at: now });
        Ok(Some(QueueEntry { job_id, due }))
    }

    async fn clear_pending(&self, job_id: JobId) -> Result<bool, QueueError> {
        Ok(self.lock()?.pending.remove(&job_id).is_some())
    }

    async fn requeue_pending(&self, entry: QueueEntry) -> Result<bool, QueueError> {
        let mut inner = self.lock()?;
        if inner.pending.remove(&entry.job_id).is_none() {
            return Ok(false);
        }
        inner.upsert(entry);
        Ok(true)
    }

    async fn list_all(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let inner = self.lock()?;
        Ok(inner
            .by_due
            .iter()
            .rev()
            .map(|&(due, job_id)| QueueEntry { job_id, due })
            .collect())
    }

    async fn count_due(&self, now: Minutes) -> Result<usize, QueueError> {
        let inner = self.lock()?;
        Ok(inner.by_due.range(..=(now, JobId::MAX)).count())
    }

    async fn pending(&self) -> Result<Vec<PendingEntry>, QueueError> {
        let inner = self.lock()?;
        let mut out: Vec<_> = inner.pending.values().copied().collect();
        out.sort_by_key(|p| (p.popped_at, p.job_id));
        Ok(out)
    }

    async fn reconcile_pending(&self, now: Minutes, grace: Minutes) -> Result<Vec<JobId>, QueueError> {
        let cutoff = now - grace;
        let mut inner = self.lock()?;
        let stale: Vec<PendingEntry> = inner
            .pending
            .values()
            .filter(|p| p.popped_at <= cutoff)
            .copied()
            .collect();

        let mut requeued = Vec::new();
        for p in stale {
            inner.pending.remove(&p.job_id);
            if inner.due_of.contains_key(&p.job_id) {
                continue;
            }
            inner.upsert(QueueEntry { job_id: p.job_id, due: p.due });
            requeued.push(p.job_id);
        }
        requeued.sort_unstable();
        if !requeued.is_empty() {
            info!(count = requeued.len(), jobs = ?requeued, "Re-queued stale pending jobs");
        }
        Ok(requeued)
    }

    async fn clear_all(&self) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        inner.by_due.clear();
        inner.due_of.clear();
        inner.pending.clear();
        Ok(())
    }
}
