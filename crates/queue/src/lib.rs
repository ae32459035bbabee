//! Persistent priority queue of job due-times plus the pending set used for
//! crash recovery.

pub mod error;
pub mod memory;
pub mod store;

pub use error::QueueError;
pub use memory::{MemoryJobQueue, QueueSnapshot};
pub use store::{JobQueue, PendingEntry, QueueEntry};
