//! Detection and data-fetch capabilities used by job execution.

pub mod detector;
pub mod error;
pub mod sigma;
pub mod source;
pub mod window;

pub use detector::{DetectionOutcome, DetectionRequest, Detector};
pub use error::{DetectError, SourceError};
pub use sigma::SigmaDetector;
pub use source::{DataSource, HttpDataSource, QueryInterval};
pub use window::{fetch_interval, slice_windows, window_ends, WindowSlice};
