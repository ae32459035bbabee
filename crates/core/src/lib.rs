pub mod cluster;
pub mod config;
pub mod error;
pub mod granularity;
pub mod job;
pub mod report;
pub mod series;
pub mod time;

pub use cluster::{Cluster, ClusterId};
pub use config::Config;
pub use error::CoreError;
pub use granularity::{Frequency, Granularity};
pub use job::{Job, JobId, JobStatus};
pub use report::{AnomalyReport, ReportGroupKey, ReportStatus};
pub use series::{Anomaly, AnomalyInterval, DataPoint, Dataset, MetricMeta, TimeSeries};
pub use time::Minutes;
