//! Data-fetch capability and the HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use lookout_core::{Cluster, DataPoint, Dataset, Granularity, Job, MetricMeta, Minutes, TimeSeries};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SourceError;

/// Half-open query interval `(start, end]` in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryInterval {
    pub start: Minutes,
    pub end: Minutes,
}

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch every series of `job`'s stored query over `interval`.
    async fn fetch(
        &self,
        job: &Job,
        cluster: &Cluster,
        interval: QueryInterval,
    ) -> Result<Dataset, SourceError>;
}

#[derive(Debug, Serialize)]
struct FetchRequest<'a> {
    query: &'a serde_json::Value,
    interval: QueryInterval,
    granularity: Granularity,
}

#[derive(Debug, Deserialize)]
struct WireSeries {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: String,
    #[serde(default)]
    points: Vec<DataPoint>,
}

impl From<WireSeries> for TimeSeries {
    fn from(w: WireSeries) -> Self {
        let name = w.name.unwrap_or_else(|| w.id.clone());
        TimeSeries::new(MetricMeta { id: w.id, name, source: w.source }, w.points)
    }
}

/// Posts the stored query as JSON to the cluster's broker URL.
#[derive(Debug, Clone)]
pub struct HttpDataSource {
    client: reqwest::Client,
}

impl HttpDataSource {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch(
        &self,
        job: &Job,
        cluster: &Cluster,
        interval: QueryInterval,
    ) -> Result<Dataset, SourceError> {
        if interval.end <= interval.start {
            return Err(SourceError::InvalidQuery(format!(
                "empty interval ({}, {}]",
                interval.start, interval.end
            )));
        }
        let body = FetchRequest {
            query: &job.query,
            interval,
            granularity: job.granularity,
        };

        let response = self
            .client
            .post(&cluster.broker_url)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SourceError::Status { status: status.as_u16(), body: body_text });
        }

        let bytes = response.bytes().await?;
        let series = parse_dataset(&bytes)?;
        debug!(
            job_id = job.job_id,
            cluster = %cluster.name,
            series = series.len(),
            "Fetched dataset"
        );
        Ok(series)
    }
}

/// Decode the source's JSON array of series.
pub fn parse_dataset(body: &[u8]) -> Result<Dataset, SourceError> {
    let wire: Vec<WireSeries> =
        serde_json::from_slice(body).map_err(|e| SourceError::Decode(e.to_string()))?;
    Ok(wire.into_iter().map(TimeSeries::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dataset_sorts_and_defaults_name() {
        let body = br#"[
            {"id": "clicks|us", "source": "country=us",
             "points": [{"time": 120, "value": 2.0}, {"time": 60, "value": 1.0}]},
            {"id": "views", "name": "page views"}
        ]"#;
        let ds = parse_dataset(body).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds[0].meta.name, "clicks|us");
        assert_eq!(ds[0].points[0].time, 60);
        assert_eq!(ds[1].meta.name, "page views");
        assert!(ds[1].is_empty());
    }

    #[test]
    fn parse_dataset_rejects_garbage() {
        assert!(matches!(parse_dataset(b"{\"nope\": 1}"), Err(SourceError::Decode(_))));
    }

    #[tokio::test]
    async fn empty_interval_is_rejected_before_any_request() {
        let source = HttpDataSource::new(Duration::from_secs(1)).unwrap();
        let job = Job::new(1, 1, serde_json::json!({}), Granularity::Hour, lookout_core::Frequency::Hour);
        let cluster = Cluster {
            cluster_id: 1,
            name: "c".to_string(),
            broker_url: "http://127.0.0.1:9".to_string(),
            description: None,
        };
        let err = source
            .fetch(&job, &cluster, QueryInterval { start: 10, end: 10 })
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidQuery(_)));
        assert!(!err.is_transient());
    }
}
