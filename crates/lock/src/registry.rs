//! Shared assignment registry under `coordination/assignments/{taskId}`.
//!
//! One entry per task: concurrent registrations by different workers touch
//! different keys, so none can overwrite another the way a single shared
//! map would. Advisory, like all lock metadata; the store's assignment
//! field stays authoritative for exclusivity.

use serde_json::Value;

use coordinator_core::{keys, CoordinationResult};
use coordinator_sync::SyncManager;

/// Every registry key, for enumeration.
const ALL_ASSIGNMENTS: &str = "coordination/assignments/*";

pub async fn register(
    sync: &SyncManager,
    task_id: &str,
    worker_id: &str,
) -> CoordinationResult<()> {
    sync.write(
        &keys::coordination_assignment(task_id),
        Value::String(worker_id.to_string()),
    )
    .await?;
    Ok(())
}

pub async fn unregister(sync: &SyncManager, task_id: &str) -> CoordinationResult<()> {
    sync.delete(&keys::coordination_assignment(task_id)).await?;
    Ok(())
}

/// All registered (task id, holder) pairs, read from the store so the sweep
/// also sees registrations this worker never cached.
pub async fn assigned_tasks(sync: &SyncManager) -> CoordinationResult<Vec<(String, String)>> {
    Ok(sync
        .read_matching(ALL_ASSIGNMENTS)
        .await?
        .into_iter()
        .filter_map(|(key, holder)| {
            let task = key.rsplit('/').next()?.to_string();
            holder.as_str().map(|h| (task, h.to_string()))
        })
        .collect())
}
