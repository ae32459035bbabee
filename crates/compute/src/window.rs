//! Splitting a fetched range into per-bucket detection windows.

use lookout_core::{Dataset, Granularity, Minutes};

use crate::source::QueryInterval;

/// One detection window cut out of a shared dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSlice {
    pub window_end: Minutes,
    /// Points in `(window_end - lookback, window_end]`.
    pub dataset: Dataset,
}

/// Ends of the consecutive granularity-sized windows covering `(start, end]`.
///
/// Empty when the range is shorter than one bucket.
pub fn window_ends(start: Minutes, end: Minutes, granularity: Granularity) -> Vec<Minutes> {
    let step = granularity.minutes();
    if step <= 0 || end - start < step {
        return Vec::new();
    }
    let count = (end - start) / step;
    (1..=count).map(|k| start + k * step).collect()
}

/// Interval to fetch so every window in `(start, end]` has `lookback` buckets
/// of history.
pub fn fetch_interval(start: Minutes, end: Minutes, granularity: Granularity, lookback: u32) -> QueryInterval {
    QueryInterval {
        start: start - granularity.minutes() * i64::from(lookback),
        end,
    }
}

/// Cut `dataset` into one slice per window in `(start, end]`, each carrying
/// `lookback` buckets of history ending at the window end.
pub fn slice_windows(
    dataset: &Dataset,
    start: Minutes,
    end: Minutes,
    granularity: Granularity,
    lookback: u32,
) -> Vec<WindowSlice> {
    let history = granularity.minutes() * i64::from(lookback);
    window_ends(start, end, granularity)
        .into_iter()
        .map(|window_end| WindowSlice {
            window_end,
            dataset: dataset
                .iter()
                .map(|s| s.slice(window_end - history, window_end))
                .collect(),
        })
        .collect()
}
