use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, histogram};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use coordinator_core::{
    keys, CoordinationError, CoordinationResult, LockConfig, LockOutcome, LockStatus,
    LockStrategy, RecordStore, RejectReason, TaskInfo, TaskLock,
};
use coordinator_sync::SyncManager;

use crate::heartbeat::HeartbeatMonitor;
use crate::registry;

/// Counters kept locally for test observability; the same events are also
/// emitted through the metrics facade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockMetrics {
    pub acquired: u64,
    pub released: u64,
    pub conflicts: u64,
    pub retries: u64,
    pub failed: u64,
    pub stolen: u64,
    pub avg_acquire_latency_ms: f64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    acquired: u64,
    released: u64,
    conflicts: u64,
    retries: u64,
    failed: u64,
    stolen: u64,
    total_acquire_ms: f64,
}

/// Outcome of a single assignment attempt against the store.
enum Attempt {
    Won(TaskLock),
    Held { owner: String },
}

/// Distributed, advisory-metadata lock manager. Exclusivity rests entirely
/// on the record store's atomic assignment field; everything else (claim
/// time, heartbeats, task hints) is advisory metadata in synchronized
/// memory, written after the assignment is won.
pub struct LockManager {
    worker_id: String,
    node_id: String,
    store: Arc<dyn RecordStore>,
    sync: Arc<SyncManager>,
    heartbeat: Arc<HeartbeatMonitor>,
    config: LockConfig,
    metrics: Mutex<MetricsInner>,
}

impl LockManager {
    pub fn new(
        worker_id: impl Into<String>,
        node_id: impl Into<String>,
        store: Arc<dyn RecordStore>,
        sync: Arc<SyncManager>,
        heartbeat: Arc<HeartbeatMonitor>,
        config: LockConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            node_id: node_id.into(),
            store,
            sync,
            heartbeat,
            config,
            metrics: Mutex::new(MetricsInner::default()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Try to acquire exclusive ownership of a task. Rejection is a normal
    /// outcome; `Err` is reserved for non-protocol failures.
    pub async fn acquire_lock(
        &self,
        task_id: &str,
        task_info: TaskInfo,
        strategy: LockStrategy,
    ) -> CoordinationResult<LockOutcome> {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut store_failures: u32 = 0;

        loop {
            attempts += 1;
            match self.try_acquire_once(task_id, &task_info).await {
                Ok(Attempt::Won(lock)) => {
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
                    {
                        let mut metrics = self.metrics.lock().await;
                        metrics.acquired += 1;
                        metrics.total_acquire_ms += elapsed_ms;
                    }
                    counter!("coordinator_locks_acquired_total").increment(1);
                    histogram!("coordinator_lock_acquire_ms").record(elapsed_ms);
                    info!(
                        "acquired lock on {} (worker {}, attempt {})",
                        task_id, self.worker_id, attempts
                    );
                    self.heartbeat.start(task_id).await;
                    return Ok(LockOutcome::Acquired(lock));
                }
                Ok(Attempt::Held { owner }) => {
                    self.metrics.lock().await.conflicts += 1;
                    counter!("coordinator_lock_conflicts_total").increment(1);
                    match strategy {
                        LockStrategy::FailFast => {
                            debug!("lock on {} held by {}, failing fast", task_id, owner);
                            return Ok(LockOutcome::Rejected(RejectReason::StillLocked {
                                owner,
                            }));
                        }
                        LockStrategy::Retry => {
                            if attempts >= self.config.max_retries {
                                self.metrics.lock().await.failed += 1;
                                warn!(
                                    "gave up on {} after {} attempts, held by {}",
                                    task_id, attempts, owner
                                );
                                return Ok(LockOutcome::Rejected(
                                    RejectReason::RetriesExhausted { attempts },
                                ));
                            }
                            let delay = self.backoff_delay(attempts);
                            debug!(
                                "lock on {} held by {}, retry {} in {:?}",
                                task_id, owner, attempts, delay
                            );
                            self.metrics.lock().await.retries += 1;
                            sleep(delay).await;
                        }
                        LockStrategy::StealStale => {
                            if self.heartbeat.recover_stale_lock(task_id).await? {
                                self.metrics.lock().await.stolen += 1;
                                counter!("coordinator_locks_stolen_total").increment(1);
                                // One more attempt against the now-cleared
                                // assignment; a faster peer may still win.
                                continue;
                            }
                            debug!(
                                "lock on {} held by {} and still fresh, not stealing",
                                task_id, owner
                            );
                            return Ok(LockOutcome::Rejected(RejectReason::StillLocked {
                                owner,
                            }));
                        }
                        LockStrategy::ForceAcquire => {
                            if attempts > 1 {
                                // Someone reassigned between our clear and
                                // our claim; do not loop on force-clearing.
                                return Ok(LockOutcome::Rejected(
                                    RejectReason::StillLocked { owner },
                                ));
                            }
                            warn!(
                                "force-acquiring {} from {} (worker {})",
                                task_id, owner, self.worker_id
                            );
                            self.store.clear_assignment(task_id).await?;
                            self.sync.delete(&keys::task_lock(task_id)).await?;
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    store_failures += 1;
                    if store_failures >= self.config.store_retry_limit {
                        self.metrics.lock().await.failed += 1;
                        warn!(
                            "store unreachable acquiring {} after {} attempts: {}",
                            task_id, store_failures, e
                        );
                        return Ok(LockOutcome::Rejected(RejectReason::StoreUnreachable {
                            detail: e.to_string(),
                        }));
                    }
                    sleep(self.backoff_delay(store_failures)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One compare-and-set round against the assignment field, confirmed by
    /// a re-read before any metadata is written.
    async fn try_acquire_once(
        &self,
        task_id: &str,
        task_info: &TaskInfo,
    ) -> CoordinationResult<Attempt> {
        if let Some(owner) = self.store.get_assignment(task_id).await? {
            return Ok(Attempt::Held { owner });
        }

        if !self.store.try_assign(task_id, &self.worker_id).await? {
            let owner = self
                .store
                .get_assignment(task_id)
                .await?
                .unwrap_or_else(|| "unknown".to_string());
            return Ok(Attempt::Held { owner });
        }

        // Confirm the field still names us before claiming victory.
        match self.store.get_assignment(task_id).await? {
            Some(owner) if owner == self.worker_id => {}
            Some(owner) => return Ok(Attempt::Held { owner }),
            None => {
                return Ok(Attempt::Held {
                    owner: "unknown".to_string(),
                })
            }
        }

        let lock = TaskLock::new(task_id, &self.worker_id, &self.node_id, task_info.clone());
        self.sync
            .write_with_ttl(
                &keys::task_lock(task_id),
                serde_json::to_value(&lock)?,
                self.heartbeat.entry_ttl(),
            )
            .await?;
        registry::register(&self.sync, task_id, &self.worker_id).await?;
        self.sync.force_sync().await?;
        Ok(Attempt::Won(lock))
    }

    /// Release a lock this worker holds. The heartbeat stops before any
    /// state changes so a late tick cannot rewrite released metadata.
    pub async fn release_lock(&self, task_id: &str) -> CoordinationResult<()> {
        let key = keys::task_lock(task_id);
        let metadata: Option<TaskLock> = match self.sync.read(&key).await? {
            Some(value) => serde_json::from_value(value).ok(),
            None => None,
        };
        let owns = match &metadata {
            Some(lock) => lock.worker_id == self.worker_id && lock.node_id == self.node_id,
            // Metadata already gone; fall back to the authoritative field.
            None => {
                self.store.get_assignment(task_id).await?.as_deref()
                    == Some(self.worker_id.as_str())
            }
        };
        if !owns {
            return Err(CoordinationError::NotLockOwner {
                task_id: task_id.to_string(),
                worker_id: self.worker_id.clone(),
            });
        }

        self.heartbeat.stop(task_id).await;

        self.sync
            .write(
                &keys::task_progress(task_id),
                json!({
                    "completed": true,
                    "worker_id": self.worker_id,
                    "node_id": self.node_id,
                    "released_at": Utc::now(),
                }),
            )
            .await?;
        self.store.clear_assignment(task_id).await?;
        self.sync.delete(&key).await?;
        registry::unregister(&self.sync, task_id).await?;
        self.sync.force_sync().await?;

        self.metrics.lock().await.released += 1;
        counter!("coordinator_locks_released_total").increment(1);
        info!("released lock on {} (worker {})", task_id, self.worker_id);
        Ok(())
    }

    /// Observed lock state. The assignment field is authoritative: metadata
    /// without an assignment reads as unlocked, and an assignment without
    /// metadata reads as held by an unknown node, with the probe time as its
    /// heartbeat so it cannot be reclaimed the moment it is seen.
    pub async fn get_lock_status(&self, task_id: &str) -> CoordinationResult<LockStatus> {
        let owner = match self.store.get_assignment(task_id).await? {
            Some(owner) => owner,
            None => return Ok(LockStatus::Unlocked),
        };

        let metadata: Option<TaskLock> = match self.sync.read(&keys::task_lock(task_id)).await? {
            Some(value) => serde_json::from_value(value).ok(),
            None => None,
        };
        match metadata {
            Some(lock) if lock.worker_id == owner => {
                if lock.is_stale(Utc::now(), self.config.lock_timeout_ms) {
                    Ok(LockStatus::Stale(lock))
                } else {
                    Ok(LockStatus::Locked(lock))
                }
            }
            _ => Ok(LockStatus::Locked(TaskLock::new(
                task_id,
                owner,
                "unknown",
                TaskInfo::default(),
            ))),
        }
    }

    /// Release every lock this worker still holds; used on shutdown.
    /// Individual failures are logged, not propagated, so one bad release
    /// cannot strand the rest.
    pub async fn release_all(&self) -> Vec<String> {
        let mut released = Vec::new();
        for task_id in self.heartbeat.held_locks().await {
            match self.release_lock(&task_id).await {
                Ok(()) => released.push(task_id),
                Err(e) => warn!("failed to release {} on shutdown: {}", task_id, e),
            }
        }
        released
    }

    pub async fn metrics(&self) -> LockMetrics {
        let inner = self.metrics.lock().await;
        let avg = if inner.acquired > 0 {
            inner.total_acquire_ms / inner.acquired as f64
        } else {
            0.0
        };
        LockMetrics {
            acquired: inner.acquired,
            released: inner.released,
            conflicts: inner.conflicts,
            retries: inner.retries,
            failed: inner.failed,
            stolen: inner.stolen,
            avg_acquire_latency_ms: avg,
        }
    }

    /// Exponential backoff with jitter, clamped to the configured window.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.backoff_max_ms);
        let spread = raw as f64 * self.config.backoff_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * spread;
        let delayed = (raw as f64 + jitter)
            .clamp(self.config.backoff_base_ms as f64, self.config.backoff_max_ms as f64);
        Duration::from_millis(delayed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_core::HeartbeatConfig;
    use coordinator_sync::SyncManager;

    fn manager_with(config: LockConfig) -> LockManager {
        let store: Arc<dyn RecordStore> = Arc::new(NullStore);
        let sync = Arc::new(SyncManager::new(
            "w1",
            Arc::clone(&store),
            coordinator_core::SyncConfig::default(),
        ));
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            "w1",
            Arc::clone(&sync),
            Arc::clone(&store),
            HeartbeatConfig::default(),
        ));
        LockManager::new("w1", "node-1", store, sync, heartbeat, config)
    }

    struct NullStore;

    #[async_trait::async_trait]
    impl RecordStore for NullStore {
        async fn get_assignment(&self, _: &str) -> CoordinationResult<Option<String>> {
            Ok(None)
        }
        async fn try_assign(&self, _: &str, _: &str) -> CoordinationResult<bool> {
            Ok(false)
        }
        async fn clear_assignment(&self, _: &str) -> CoordinationResult<()> {
            Ok(())
        }
        async fn append_record(&self, _: &str, _: &str) -> CoordinationResult<()> {
            Ok(())
        }
        async fn list_records(&self, _: &str) -> CoordinationResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn backoff_doubles_and_caps() {
        let manager = manager_with(LockConfig {
            backoff_base_ms: 1_000,
            backoff_max_ms: 16_000,
            backoff_jitter: 0.0,
            ..Default::default()
        });
        assert_eq!(manager.backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(manager.backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(manager.backoff_delay(3), Duration::from_millis(4_000));
        assert_eq!(manager.backoff_delay(5), Duration::from_millis(16_000));
        assert_eq!(manager.backoff_delay(10), Duration::from_millis(16_000));
    }

    #[tokio::test]
    async fn backoff_jitter_stays_within_bounds() {
        let manager = manager_with(LockConfig {
            backoff_base_ms: 1_000,
            backoff_max_ms: 16_000,
            backoff_jitter: 0.1,
            ..Default::default()
        });
        for _ in 0..100 {
            let delay = manager.backoff_delay(3).as_millis() as u64;
            assert!((3_600..=4_400).contains(&delay), "delay out of range: {delay}");
        }
    }

    #[tokio::test]
    async fn backoff_never_exceeds_cap_even_with_jitter() {
        let manager = manager_with(LockConfig {
            backoff_base_ms: 1_000,
            backoff_max_ms: 4_000,
            backoff_jitter: 0.5,
            ..Default::default()
        });
        for _ in 0..100 {
            assert!(manager.backoff_delay(8) <= Duration::from_millis(4_000));
        }
    }
}
