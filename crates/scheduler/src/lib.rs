//! Job scheduling core: the due-time queue driven by a fixed-rate dispatch
//! loop, schedule arithmetic, single-job execution and historical backfill.

pub mod backup;
pub mod calculator;
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod recoverable;
pub mod service;

pub use backup::{restore_latest, BackupTask, RestoredState};
pub use calculator::{is_lagging, reschedule_time, schedule_time, stagger, ScheduleTimes};
pub use clock::{Clock, FixedClock, SystemClock};
pub use dispatch::{Dispatcher, TickSummary};
pub use error::SchedulerError;
pub use execution::{BackfillOutcome, Collaborators, ExecutionOutcome, ExecutionService};
pub use metrics::SchedulerMetrics;
pub use recoverable::{AlwaysResubmit, PeriodicTask, RecoverableExecutor, ResubmitPolicy, TaskFailure};
pub use service::SchedulerService;
