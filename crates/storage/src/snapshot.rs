//! JSON snapshot of job records, clusters and the queue.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lookout_core::{Cluster, Job};
use lookout_queue::{JobQueue, QueueSnapshot};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::accessor::{ClusterAccessor, JobAccessor};
use crate::error::StoreError;

const SNAPSHOT_PREFIX: &str = "lookout-snapshot-";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub jobs: Vec<Job>,
    pub clusters: Vec<Cluster>,
    pub queue: QueueSnapshot,
}

impl Snapshot {
    pub async fn capture(
        jobs: &dyn JobAccessor,
        clusters: &dyn ClusterAccessor,
        queue: &dyn JobQueue,
        taken_at: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            taken_at,
            jobs: jobs.list_jobs().await?,
            clusters: clusters.list_clusters().await?,
            queue: QueueSnapshot {
                entries: queue.list_all().await?,
                pending: queue.pending().await?,
            },
        })
    }

    /// File name used inside the backup directory, one per UTC day.
    pub fn file_name(&self) -> String {
        format!("{SNAPSHOT_PREFIX}{}.json", self.taken_at.format("%Y-%m-%d"))
    }

    /// Write the snapshot into `dir`, replacing any snapshot of the same day.
    ///
    /// The file is written under a temporary name and renamed into place.
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(dir).await?;
        let target = dir.join(self.file_name());
        let tmp = target.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &target).await?;
        info!(
            path = %target.display(),
            jobs = self.jobs.len(),
            queued = self.queue.entries.len(),
            "Wrote snapshot"
        );
        Ok(target)
    }

    pub async fn read_from(path: &Path) -> Result<Self, StoreError> {
        let body = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// The newest snapshot in `dir`, or `None` when the directory is missing
    /// or holds no snapshot. Half-written temporary files are ignored.
    pub async fn latest_in(dir: &Path) -> Result<Option<Self>, StoreError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut newest: Option<PathBuf> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(".json"));
            // Day-stamped names sort chronologically.
            if is_snapshot && newest.as_ref().map_or(true, |n| path > *n) {
                newest = Some(path);
            }
        }
        match newest {
            Some(path) => {
                info!(path = %path.display(), "Reading latest snapshot");
                Self::read_from(&path).await.map(Some)
            }
            None => Ok(None),
        }
    }
}
