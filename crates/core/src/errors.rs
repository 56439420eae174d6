use thiserror::Error;

/// Coordination error taxonomy.
///
/// `LockConflict` and `StaleOwner` are expected protocol outcomes and are
/// handled inside the lock manager; they only escape when a caller bypasses
/// the acquisition strategies. `NotLockOwner` always indicates a caller bug.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("task {task_id} is locked by {owner}")]
    LockConflict { task_id: String, owner: String },

    #[error("lock on task {task_id} is held by stale owner {owner}")]
    StaleOwner { task_id: String, owner: String },

    #[error("worker {worker_id} does not own the lock on task {task_id}")]
    NotLockOwner { task_id: String, worker_id: String },

    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        CoordinationError::Serialization(err.to_string())
    }
}

impl CoordinationError {
    /// Whether the error is transient and worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinationError::StoreUnavailable(_))
    }
}
