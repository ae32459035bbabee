//! Record accessors for jobs, reports and clusters, plus JSON snapshots.

pub mod accessor;
pub mod error;
pub mod memory;
pub mod snapshot;

pub use accessor::{ClusterAccessor, JobAccessor, ReportAccessor};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use snapshot::Snapshot;
