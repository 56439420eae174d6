use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Advisory hints attached to a lock, never used for correctness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInfo {
    pub complexity: u32,
    pub estimated_duration_ms: u64,
    pub task_type: Option<String>,
    pub priority: u8,
}

impl Default for TaskInfo {
    fn default() -> Self {
        Self {
            complexity: 1,
            estimated_duration_ms: 0,
            task_type: None,
            priority: 5,
        }
    }
}

/// Exclusive ownership of one task, persisted as advisory metadata next to
/// the record store's authoritative assignment field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskLock {
    pub task_id: String,
    pub worker_id: String,
    /// Distinguishes process restarts on the same logical worker.
    pub node_id: String,
    pub claimed_at: DateTime<Utc>,
    pub heartbeat_last: DateTime<Utc>,
    #[serde(default)]
    pub task_info: TaskInfo,
}

impl TaskLock {
    pub fn new(
        task_id: impl Into<String>,
        worker_id: impl Into<String>,
        node_id: impl Into<String>,
        task_info: TaskInfo,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            worker_id: worker_id.into(),
            node_id: node_id.into(),
            claimed_at: now,
            heartbeat_last: now,
            task_info,
        }
    }

    pub fn owned_by(&self, worker_id: &str) -> bool {
        self.worker_id == worker_id
    }

    /// A lock is stale once its holder stopped refreshing `heartbeat_last`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold_ms: u64) -> bool {
        (now - self.heartbeat_last).num_milliseconds() > threshold_ms as i64
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        // Heartbeats never move backwards, even if the caller's clock does.
        if now > self.heartbeat_last {
            self.heartbeat_last = now;
        }
    }
}

/// Conflict handling applied when a task is already assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategy {
    /// Exponential backoff and re-attempt up to the configured limit.
    Retry,
    /// Report the conflict immediately.
    FailFast,
    /// Reclaim the lock if the holder's heartbeat exceeds the stale threshold.
    StealStale,
    /// Unconditionally clear and reassign; administrative recovery only.
    ForceAcquire,
}

/// Result of an acquisition attempt. Rejection is a normal protocol outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome {
    Acquired(TaskLock),
    Rejected(RejectReason),
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }

    pub fn lock(&self) -> Option<&TaskLock> {
        match self {
            LockOutcome::Acquired(lock) => Some(lock),
            LockOutcome::Rejected(_) => None,
        }
    }
}

/// Reason code for a failed acquisition, letting the orchestration layer
/// decide between requeue, escalation and abandonment.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    StillLocked { owner: String },
    StoreUnreachable { detail: String },
    RetriesExhausted { attempts: u32 },
}

/// Observed state of a task's lock.
#[derive(Debug, Clone, PartialEq)]
pub enum LockStatus {
    Unlocked,
    Locked(TaskLock),
    /// Held, but the owner's heartbeat exceeded the lock timeout.
    Stale(TaskLock),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn staleness_follows_heartbeat_age() {
        let mut lock = TaskLock::new("task-1", "worker-a", "node-1", TaskInfo::default());
        let now = Utc::now();
        lock.heartbeat_last = now - Duration::seconds(200);

        assert!(!lock.is_stale(now, 300_000));
        assert!(lock.is_stale(now, 100_000));
    }

    #[test]
    fn touch_never_regresses() {
        let mut lock = TaskLock::new("task-1", "worker-a", "node-1", TaskInfo::default());
        let before = lock.heartbeat_last;
        lock.touch(before - Duration::seconds(5));
        assert_eq!(lock.heartbeat_last, before);

        let later = before + Duration::seconds(30);
        lock.touch(later);
        assert_eq!(lock.heartbeat_last, later);
    }

    #[test]
    fn lock_metadata_round_trips_as_json() {
        let lock = TaskLock::new(
            "task-42",
            "worker-a",
            "node-1",
            TaskInfo {
                complexity: 3,
                estimated_duration_ms: 90_000,
                task_type: Some("build".to_string()),
                priority: 9,
            },
        );
        let text = serde_json::to_string(&lock).unwrap();
        let parsed: TaskLock = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, lock);
    }
}
