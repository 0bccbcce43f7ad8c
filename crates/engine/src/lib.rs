//! obsync-engine: The replication engine
//!
//! Wires the filesystem watcher, the transfer worker pool, and the
//! periodic reconciliation job around shared upload/delete queues.

pub mod checker;
pub mod compare;
pub mod transfer;
pub mod watcher;

pub use checker::CheckJob;
pub use compare::Comparator;
pub use transfer::{SharedReceiver, SkipTransfer, Transfer};
pub use watcher::Watcher;

/// Number of transfer workers the supervisor starts
pub const WORKER_COUNT: usize = 8;

/// Upload queue capacity, sized for bursty event storms
pub const UPLOAD_QUEUE_CAP: usize = 32 * WORKER_COUNT;

/// Delete queue capacity
pub const DELETE_QUEUE_CAP: usize = 64;
