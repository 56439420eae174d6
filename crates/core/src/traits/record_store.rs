use async_trait::async_trait;

use crate::CoordinationResult;

/// The external record store consumed as a coordination substrate.
///
/// Four primitives are required of any backing implementation: an atomic
/// assignment slot per task (the only source of mutual exclusion) and an
/// append-only per-topic log readable in insertion order (used to persist
/// lock metadata, heartbeats and synchronized state as JSON text).
///
/// Transport failures surface as `CoordinationError::StoreUnavailable`;
/// retry policy belongs to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Current exclusive holder of the task, if any.
    async fn get_assignment(&self, task_id: &str) -> CoordinationResult<Option<String>>;

    /// Atomic compare-and-set from "unassigned" to `worker_id`.
    ///
    /// Must return `false` (never silently succeed) when another assignment
    /// won the race.
    async fn try_assign(&self, task_id: &str, worker_id: &str) -> CoordinationResult<bool>;

    /// Unconditional release of the assignment slot.
    async fn clear_assignment(&self, task_id: &str) -> CoordinationResult<()>;

    /// Append one text record to the topic's log.
    async fn append_record(&self, topic: &str, text: &str) -> CoordinationResult<()>;

    /// All records of the topic, in insertion order.
    async fn list_records(&self, topic: &str) -> CoordinationResult<Vec<String>>;
}
