use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard and soft constraints a task places on worker selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskRequirements {
    pub required_capabilities: Vec<String>,
    pub complexity: u32,
    pub priority: u8,
    pub task_type: Option<String>,
    /// Workers preferred by the caller; scored up, never mandatory.
    pub affinity: Vec<String>,
    /// Workers excluded before scoring.
    pub anti_affinity: Vec<String>,
}

/// A queued-but-unstarted task, the unit of queue reordering and migration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedTask {
    pub task_id: String,
    pub requirements: TaskRequirements,
    pub enqueued_at: DateTime<Utc>,
    /// Worker the task is currently queued on, if any.
    pub assigned_to: Option<String>,
}

impl QueuedTask {
    pub fn new(task_id: impl Into<String>, requirements: TaskRequirements) -> Self {
        Self {
            task_id: task_id.into(),
            requirements,
            enqueued_at: Utc::now(),
            assigned_to: None,
        }
    }
}
