//! Daily JSON snapshot of job records, clusters and the queue.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use lookout_queue::{JobQueue, MemoryJobQueue};
use lookout_storage::{ClusterAccessor, JobAccessor, MemoryStore, Snapshot};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::recoverable::PeriodicTask;

/// Writes one snapshot per UTC day, on the first run after midnight.
pub struct BackupTask {
    jobs: Arc<dyn JobAccessor>,
    clusters: Arc<dyn ClusterAccessor>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    dir: PathBuf,
    last_day: Mutex<Option<NaiveDate>>,
}

impl BackupTask {
    pub fn new(
        jobs: Arc<dyn JobAccessor>,
        clusters: Arc<dyn ClusterAccessor>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        dir: PathBuf,
    ) -> Self {
        Self { jobs, clusters, queue, clock, dir, last_day: Mutex::new(None) }
    }

    fn last_day(&self) -> Option<NaiveDate> {
        match self.last_day.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_last_day(&self, day: NaiveDate) {
        match self.last_day.lock() {
            Ok(mut g) => *g = Some(day),
            Err(poisoned) => *poisoned.into_inner() = Some(day),
        }
    }

    /// Write today's snapshot unless it was already written. Returns the
    /// file written, if any.
    pub async fn backup_if_due(&self) -> Result<Option<PathBuf>, SchedulerError> {
        let now = self.clock.now();
        let today = now.date_naive();
        if self.last_day() == Some(today) {
            debug!(day = %today, "Snapshot already written today");
            return Ok(None);
        }
        let snapshot =
            Snapshot::capture(self.jobs.as_ref(), self.clusters.as_ref(), self.queue.as_ref(), now).await?;
        let path = snapshot.write_to(&self.dir).await?;
        self.set_last_day(today);
        Ok(Some(path))
    }
}

/// In-memory stores rebuilt from a snapshot, pending markers included.
pub struct RestoredState {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub taken_at: DateTime<Utc>,
}

/// Rebuild the stores from the newest snapshot in `dir`, if there is one.
/// Restored pending markers are re-queued when the service starts.
pub async fn restore_latest(dir: &Path) -> Result<Option<RestoredState>, SchedulerError> {
    let Some(snapshot) = Snapshot::latest_in(dir).await? else {
        return Ok(None);
    };
    info!(
        taken_at = %snapshot.taken_at,
        jobs = snapshot.jobs.len(),
        queued = snapshot.queue.entries.len(),
        pending = snapshot.queue.pending.len(),
        "Restoring from snapshot"
    );
    Ok(Some(RestoredState {
        store: Arc::new(MemoryStore::seeded(snapshot.jobs, snapshot.clusters)),
        queue: Arc::new(MemoryJobQueue::from_snapshot(snapshot.queue)),
        taken_at: snapshot.taken_at,
    }))
}

#[async_trait]
impl PeriodicTask for BackupTask {
    fn name(&self) -> &str {
        "backup"
    }

    async fn run(&self) -> Result<(), SchedulerError> {
        self.backup_if_due().await.map(|_| ())
    }
}
