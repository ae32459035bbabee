//! In-process record store backing all three accessors.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use lookout_core::{AnomalyReport, Cluster, ClusterId, Job, JobId, ReportGroupKey};
use tracing::debug;

use crate::accessor::{ClusterAccessor, JobAccessor, ReportAccessor};
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<BTreeMap<JobId, Job>>,
    clusters: RwLock<BTreeMap<ClusterId, Cluster>>,
    reports: RwLock<BTreeMap<ReportGroupKey, Vec<AnomalyReport>>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with jobs and clusters.
    pub fn seeded(jobs: Vec<Job>, clusters: Vec<Cluster>) -> Self {
        Self {
            jobs: RwLock::new(jobs.into_iter().map(|j| (j.job_id, j)).collect()),
            clusters: RwLock::new(clusters.into_iter().map(|c| (c.cluster_id, c)).collect()),
            reports: RwLock::default(),
        }
    }

    /// Total number of stored reports across all groups.
    pub fn report_count(&self) -> Result<usize, StoreError> {
        Ok(read(&self.reports)?.values().map(Vec::len).sum())
    }
}

#[async_trait]
impl JobAccessor for MemoryStore {
    async fn get_job(&self, job_id: JobId) -> Result<Job, StoreError> {
        read(&self.jobs)?
            .get(&job_id)
            .cloned()
            .ok_or_else(|| StoreError::job_not_found(job_id))
    }

    async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        write(&self.jobs)?.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn put_job_if_dispatchable(&self, job: &Job) -> Result<bool, StoreError> {
        let mut jobs = write(&self.jobs)?;
        match jobs.get_mut(&job.job_id) {
            Some(stored) if stored.status.is_dispatchable() => {
                *stored = job.clone();
                Ok(true)
            }
            Some(stored) => {
                debug!(job_id = job.job_id, status = %stored.status, "Refused write over halted job");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn delete_job(&self, job_id: JobId) -> Result<(), StoreError> {
        write(&self.jobs)?
            .remove(&job_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::job_not_found(job_id))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(read(&self.jobs)?.values().cloned().collect())
    }
}

#[async_trait]
impl ReportAccessor for MemoryStore {
    async fn put_reports(&self, reports: &[AnomalyReport]) -> Result<(), StoreError> {
        let keys: HashSet<ReportGroupKey> = reports.iter().map(AnomalyReport::group_key).collect();
        let mut map = write(&self.reports)?;
        for key in &keys {
            map.remove(key);
        }
        for report in reports {
            map.entry(report.group_key()).or_default().push(report.clone());
        }
        debug!(reports = reports.len(), groups = keys.len(), "Stored reports");
        Ok(())
    }

    async fn reports_for_job(&self, job_id: JobId) -> Result<Vec<AnomalyReport>, StoreError> {
        let map = read(&self.reports)?;
        Ok(map
            .iter()
            .filter(|(k, _)| k.job_id == job_id)
            .flat_map(|(_, v)| v.iter().cloned())
            .collect())
    }

    async fn delete_reports_for_job(&self, job_id: JobId) -> Result<usize, StoreError> {
        let mut map = write(&self.reports)?;
        let before: usize = map.values().map(Vec::len).sum();
        map.retain(|k, _| k.job_id != job_id);
        let after: usize = map.values().map(Vec::len).sum();
        Ok(before - after)
    }
}

#[async_trait]
impl ClusterAccessor for MemoryStore {
    async fn get_cluster(&self, cluster_id: ClusterId) -> Result<Cluster, StoreError> {
        read(&self.clusters)?
            .get(&cluster_id)
            .cloned()
            .ok_or_else(|| StoreError::cluster_not_found(cluster_id))
    }

    async fn put_cluster(&self, cluster: &Cluster) -> Result<(), StoreError> {
        write(&self.clusters)?.insert(cluster.cluster_id, cluster.clone());
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, StoreError> {
        Ok(read(&self.clusters)?.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::{Frequency, Granularity, JobStatus, ReportStatus};

    fn job(id: JobId) -> Job {
        Job::new(id, 1, serde_json::json!({}), Granularity::Day, Frequency::Day)
    }

    #[tokio::test]
    async fn job_crud() {
        let store = MemoryStore::new();
        assert!(store.get_job(1).await.unwrap_err().is_not_found());

        store.put_job(&job(2)).await.unwrap();
        store.put_job(&job(1)).await.unwrap();
        let ids: Vec<_> = store.list_jobs().await.unwrap().iter().map(|j| j.job_id).collect();
        assert_eq!(ids, vec![1, 2]);

        store.delete_job(1).await.unwrap();
        assert!(store.delete_job(1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn conditional_put_leaves_halted_and_missing_jobs_alone() {
        let store = MemoryStore::seeded(vec![job(1)], vec![]);
        let mut running = job(1);
        running.status = JobStatus::Running;
        assert!(store.put_job_if_dispatchable(&running).await.unwrap());
        assert_eq!(store.get_job(1).await.unwrap().status, JobStatus::Running);

        let mut stopped = running.clone();
        stopped.status = JobStatus::Stopped;
        store.put_job(&stopped).await.unwrap();
        running.effective_run_time = Some(500);
        assert!(!store.put_job_if_dispatchable(&running).await.unwrap());
        let stored = store.get_job(1).await.unwrap();
        assert_eq!((stored.status, stored.effective_run_time), (JobStatus::Stopped, None));

        // A deleted record is not recreated.
        assert!(!store.put_job_if_dispatchable(&job(2)).await.unwrap());
        assert!(store.get_job(2).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn put_reports_replaces_same_window() {
        let store = MemoryStore::new();
        let j = job(4);
        let first = vec![
            AnomalyReport::singleton(&j, ReportStatus::Error, None, 100),
            AnomalyReport::singleton(&j, ReportStatus::Success, None, 200),
        ];
        store.put_reports(&first).await.unwrap();
        assert_eq!(store.report_count().unwrap(), 2);

        let rerun = vec![AnomalyReport::singleton(&j, ReportStatus::Success, None, 100)];
        store.put_reports(&rerun).await.unwrap();

        let reports = store.reports_for_job(4).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].query_end_time, 100);
        assert_eq!(reports[0].status, ReportStatus::Success);
    }

    #[tokio::test]
    async fn delete_reports_for_job_only_touches_that_job() {
        let store = MemoryStore::new();
        store
            .put_reports(&[
                AnomalyReport::singleton(&job(1), ReportStatus::Success, None, 1),
                AnomalyReport::singleton(&job(2), ReportStatus::Success, None, 1),
            ])
            .await
            .unwrap();
        assert_eq!(store.delete_reports_for_job(1).await.unwrap(), 1);
        assert_eq!(store.report_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn clusters_are_keyed_by_id() {
        let c = Cluster {
            cluster_id: 3,
            name: "metrics".to_string(),
            broker_url: "http://broker:8082".to_string(),
            description: None,
        };
        let store = MemoryStore::seeded(vec![], vec![c.clone()]);
        assert_eq!(store.get_cluster(3).await.unwrap(), c);
        assert!(store.get_cluster(9).await.unwrap_err().is_not_found());
        assert_eq!(store.list_clusters().await.unwrap().len(), 1);
    }
}
