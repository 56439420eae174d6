use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use coordinator_core::{CoordinationError, CoordinationResult, RecordStore};

/// In-memory record store implementation.
///
/// Backs embedded deployments and tests with the same semantics the external
/// tracker provides: an atomic assignment slot per task and append-only
/// per-topic logs. All mutations happen under one write lock, which gives
/// `try_assign` its compare-and-set guarantee.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    state: RwLock<StoreState>,
    /// Remaining calls that fail with `StoreUnavailable`; for retry tests.
    fail_next: AtomicU32,
}

#[derive(Debug, Default)]
struct StoreState {
    assignments: HashMap<String, String>,
    records: HashMap<String, Vec<String>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` store calls fail as unavailable.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    fn check_fault(&self) -> CoordinationResult<()> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .fail_next
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(CoordinationError::StoreUnavailable(
                "injected fault".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of currently assigned tasks; test observability.
    pub async fn assignment_count(&self) -> usize {
        self.state.read().await.assignments.len()
    }

    /// Number of records appended to a topic; test observability.
    pub async fn record_count(&self, topic: &str) -> usize {
        self.state
            .read()
            .await
            .records
            .get(topic)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_assignment(&self, task_id: &str) -> CoordinationResult<Option<String>> {
        self.check_fault()?;
        let state = self.state.read().await;
        Ok(state.assignments.get(task_id).cloned())
    }

    async fn try_assign(&self, task_id: &str, worker_id: &str) -> CoordinationResult<bool> {
        self.check_fault()?;
        let mut state = self.state.write().await;
        if state.assignments.contains_key(task_id) {
            debug!("assignment CAS lost: {} already held", task_id);
            return Ok(false);
        }
        state
            .assignments
            .insert(task_id.to_string(), worker_id.to_string());
        debug!("assigned {} to {}", task_id, worker_id);
        Ok(true)
    }

    async fn clear_assignment(&self, task_id: &str) -> CoordinationResult<()> {
        self.check_fault()?;
        let mut state = self.state.write().await;
        state.assignments.remove(task_id);
        Ok(())
    }

    async fn append_record(&self, topic: &str, text: &str) -> CoordinationResult<()> {
        self.check_fault()?;
        let mut state = self.state.write().await;
        state
            .records
            .entry(topic.to_string())
            .or_default()
            .push(text.to_string());
        Ok(())
    }

    async fn list_records(&self, topic: &str) -> CoordinationResult<Vec<String>> {
        self.check_fault()?;
        let state = self.state.read().await;
        Ok(state.records.get(topic).cloned().unwrap_or_default())
    }
}
