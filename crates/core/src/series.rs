//! Time-series data exchanged between the data source, the detector and
//! report construction.

use serde::{Deserialize, Serialize};

use crate::time::Minutes;

/// Identity of one series within a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricMeta {
    /// Unique id of the series (typically metric + group-by values).
    pub id: String,
    pub name: String,
    /// Group-by filters that produced this series.
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub time: Minutes,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub meta: MetricMeta,
    #[serde(default)]
    pub points: Vec<DataPoint>,
}

/// A fetched set of series covering one query interval.
pub type Dataset = Vec<TimeSeries>;

impl TimeSeries {
    pub fn new(meta: MetricMeta, mut points: Vec<DataPoint>) -> Self {
        points.sort_by_key(|p| p.time);
        Self { meta, points }
    }

    /// Points with `start < time <= end`, keeping the series identity.
    pub fn slice(&self, start: Minutes, end: Minutes) -> TimeSeries {
        TimeSeries {
            meta: self.meta.clone(),
            points: self
                .points
                .iter()
                .filter(|p| p.time > start && p.time <= end)
                .copied()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// One anomalous stretch of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyInterval {
    pub start: Minutes,
    pub end: Option<Minutes>,
    pub observed: f64,
    pub expected: f64,
}

/// Detector output for one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub meta: MetricMeta,
    #[serde(default)]
    pub intervals: Vec<AnomalyInterval>,
    /// Model that produced the verdict, e.g. `"sigma"`.
    pub model: String,
    #[serde(default)]
    pub deviation: Option<String>,
}

impl Anomaly {
    pub fn has_anomaly(&self) -> bool {
        !self.intervals.is_empty()
    }
}
