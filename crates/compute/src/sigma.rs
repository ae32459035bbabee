//! Built-in z-score detector.
//!
//! For each series the points inside the tested window are compared with the
//! mean and standard deviation of the points before it. A point with
//! |z| above the job's sigma threshold is anomalous; adjacent anomalous
//! buckets merge into one interval.

use lookout_core::{Anomaly, AnomalyInterval, DataPoint, Minutes, TimeSeries};
use rayon::prelude::*;
use tracing::debug;

use crate::detector::{DetectionOutcome, DetectionRequest, Detector};
use crate::error::DetectError;

pub const MODEL_NAME: &str = "sigma";

/// Baselines shorter than this never flag anything.
const MIN_BASELINE: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct SigmaDetector;

impl SigmaDetector {
    pub fn new() -> Self {
        Self
    }
}

/// Mean and population standard deviation.
pub(crate) fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

struct Scored {
    point: DataPoint,
    z: f64,
}

fn score_series(
    series: &TimeSeries,
    window_start: Minutes,
    window_end: Minutes,
    bucket: Minutes,
    threshold: f64,
) -> Anomaly {
    let baseline: Vec<f64> = series
        .points
        .iter()
        .filter(|p| p.time <= window_start)
        .map(|p| p.value)
        .collect();
    let tested = series
        .points
        .iter()
        .filter(|p| p.time > window_start && p.time <= window_end);

    let mut verdict = Anomaly {
        meta: series.meta.clone(),
        intervals: Vec::new(),
        model: MODEL_NAME.to_string(),
        deviation: None,
    };
    if baseline.len() < MIN_BASELINE {
        return verdict;
    }
    let (mean, std) = mean_stddev(&baseline);
    if std <= f64::EPSILON {
        return verdict;
    }

    let flagged: Vec<Scored> = tested
        .map(|p| Scored { point: *p, z: (p.value - mean) / std })
        .filter(|s| s.z.abs() > threshold)
        .collect();

    let mut max_z: f64 = 0.0;
    let mut current: Option<(AnomalyInterval, f64)> = None;
    for s in flagged {
        max_z = max_z.max(s.z.abs());
        let start = s.point.time - bucket;
        match current.as_mut() {
            Some((interval, worst)) if interval.end == Some(start) => {
                interval.end = Some(s.point.time);
                if s.z.abs() > *worst {
                    *worst = s.z.abs();
                    interval.observed = s.point.value;
                }
            }
            _ => {
                if let Some((done, _)) = current.take() {
                    verdict.intervals.push(done);
                }
                current = Some((
                    AnomalyInterval {
                        start,
                        end: Some(s.point.time),
                        observed: s.point.value,
                        expected: mean,
                    },
                    s.z.abs(),
                ));
            }
        }
    }
    if let Some((done, _)) = current {
        verdict.intervals.push(done);
    }
    if verdict.has_anomaly() {
        verdict.deviation = Some(format!("{max_z:.2} sigma"));
    }
    verdict
}

impl Detector for SigmaDetector {
    fn name(&self) -> &str {
        MODEL_NAME
    }

    fn detect(&self, request: &DetectionRequest<'_>) -> Result<DetectionOutcome, DetectError> {
        let job = request.job;
        if !job.sigma_threshold.is_finite() || job.sigma_threshold <= 0.0 {
            return Err(DetectError::InvalidRequest(format!(
                "sigma threshold must be positive, got {}",
                job.sigma_threshold
            )));
        }

        let window_start = request.window_start();
        let window_end = request.window_end;
        let has_window_data = request.dataset.iter().any(|s| {
            s.points
                .iter()
                .any(|p| p.time > window_start && p.time <= window_end)
        });
        if !has_window_data {
            return Ok(DetectionOutcome::NoData);
        }

        let bucket = job.granularity.minutes();
        let verdicts: Vec<Anomaly> = request
            .dataset
            .par_iter()
            .map(|s| score_series(s, window_start, window_end, bucket, job.sigma_threshold))
            .collect();

        debug!(
            job_id = job.job_id,
            series = verdicts.len(),
            anomalous = verdicts.iter().filter(|a| a.has_anomaly()).count(),
            "Sigma detection complete"
        );
        Ok(DetectionOutcome::Anomalies(verdicts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::{Frequency, Granularity, Job, MetricMeta};

    fn job() -> Job {
        let mut j = Job::new(1, 1, serde_json::json!({}), Granularity::Hour, Frequency::Hour);
        j.granularity_range = 2;
        j
    }

    fn series(id: &str, values: &[(Minutes, f64)]) -> TimeSeries {
        TimeSeries::new(
            MetricMeta { id: id.to_string(), name: id.to_string(), source: String::new() },
            values.iter().map(|&(time, value)| DataPoint { time, value }).collect(),
        )
    }

    fn baseline_then(tail: &[f64]) -> Vec<(Minutes, f64)> {
        let mut pts: Vec<(Minutes, f64)> = (1..=10)
            .map(|i| (i * 60, if i % 2 == 0 { 10.0 } else { 12.0 }))
            .collect();
        for (k, v) in tail.iter().enumerate() {
            pts.push(((11 + k as i64) * 60, *v));
        }
        pts
    }

    #[test]
    fn mean_stddev_basic() {
        let (m, s) = mean_stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((m - 5.0).abs() < 1e-9);
        assert!((s - 2.0).abs() < 1e-9);
    }

    #[test]
    fn spike_in_window_is_flagged() {
        let j = job();
        let ds = vec![series("a", &baseline_then(&[11.0, 50.0]))];
        let req = DetectionRequest::new(&j, &ds, 12 * 60);
        let outcome = SigmaDetector::new().detect(&req).unwrap();
        let DetectionOutcome::Anomalies(verdicts) = outcome else {
            panic!("expected anomalies");
        };
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].intervals.len(), 1);
        let iv = &verdicts[0].intervals[0];
        assert_eq!(iv.start, 11 * 60);
        assert_eq!(iv.end, Some(12 * 60));
        assert_eq!(iv.observed, 50.0);
        assert!(verdicts[0].deviation.is_some());
    }

    #[test]
    fn adjacent_spikes_merge() {
        let j = job();
        let ds = vec![series("a", &baseline_then(&[60.0, 70.0]))];
        let req = DetectionRequest::new(&j, &ds, 12 * 60);
        let outcome = SigmaDetector::new().detect(&req).unwrap();
        assert_eq!(outcome.anomalous_count(), 1);
        let DetectionOutcome::Anomalies(v) = outcome else { unreachable!() };
        assert_eq!(v[0].intervals.len(), 1);
        assert_eq!(v[0].intervals[0].start, 10 * 60);
        assert_eq!(v[0].intervals[0].observed, 70.0);
    }

    #[test]
    fn normal_window_is_clean() {
        let j = job();
        let ds = vec![series("a", &baseline_then(&[11.0, 10.5]))];
        let req = DetectionRequest::new(&j, &ds, 12 * 60);
        let outcome = SigmaDetector::new().detect(&req).unwrap();
        assert_eq!(outcome.anomalous_count(), 0);
    }

    #[test]
    fn empty_window_is_no_data() {
        let j = job();
        let ds = vec![series("a", &baseline_then(&[]))];
        let req = DetectionRequest::new(&j, &ds, 20 * 60);
        assert_eq!(SigmaDetector::new().detect(&req).unwrap(), DetectionOutcome::NoData);

        let empty = Vec::new();
        let req = DetectionRequest::new(&j, &empty, 20 * 60);
        assert_eq!(SigmaDetector::new().detect(&req).unwrap(), DetectionOutcome::NoData);
    }

    #[test]
    fn rejects_non_positive_threshold() {
        let mut j = job();
        j.sigma_threshold = 0.0;
        let ds = vec![series("a", &baseline_then(&[1.0]))];
        let req = DetectionRequest::new(&j, &ds, 11 * 60);
        assert!(matches!(
            SigmaDetector::new().detect(&req),
            Err(DetectError::InvalidRequest(_))
        ));
    }
}
