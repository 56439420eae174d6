pub mod keys;
pub mod lock;
pub mod task;
pub mod worker;

pub use lock::{LockOutcome, LockStatus, LockStrategy, RejectReason, TaskInfo, TaskLock};
pub use task::{QueuedTask, TaskRequirements};
pub use worker::{WorkerMetrics, WorkerSnapshot, WorkerStatus};
