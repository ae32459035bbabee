//! Key-indexed accessors for job, report and cluster records.

use async_trait::async_trait;
use lookout_core::{AnomalyReport, Cluster, ClusterId, Job, JobId};

use crate::error::StoreError;

#[async_trait]
pub trait JobAccessor: Send + Sync {
    /// Fetch one job. Returns [`StoreError::NotFound`] if absent.
    async fn get_job(&self, job_id: JobId) -> Result<Job, StoreError>;

    /// Insert or overwrite a job record.
    async fn put_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Overwrite the record only if it still exists with a dispatchable
    /// status. The check and the write are one step. Returns `false`, having
    /// written nothing, when the record was stopped, failed or deleted in
    /// the meantime.
    async fn put_job_if_dispatchable(&self, job: &Job) -> Result<bool, StoreError>;

    /// Delete a job record. Returns [`StoreError::NotFound`] if absent.
    async fn delete_job(&self, job_id: JobId) -> Result<(), StoreError>;

    /// All jobs, ascending by id.
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;
}

#[async_trait]
pub trait ReportAccessor: Send + Sync {
    /// Store a batch of reports. Existing reports sharing a group key with
    /// any report of the batch are replaced as a whole.
    async fn put_reports(&self, reports: &[AnomalyReport]) -> Result<(), StoreError>;

    /// Reports of one job, ascending by window end.
    async fn reports_for_job(&self, job_id: JobId) -> Result<Vec<AnomalyReport>, StoreError>;

    async fn delete_reports_for_job(&self, job_id: JobId) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait ClusterAccessor: Send + Sync {
    async fn get_cluster(&self, cluster_id: ClusterId) -> Result<Cluster, StoreError>;

    async fn put_cluster(&self, cluster: &Cluster) -> Result<(), StoreError>;

    async fn list_clusters(&self) -> Result<Vec<Cluster>, StoreError>;
}
