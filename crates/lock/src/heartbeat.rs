use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use coordinator_core::{keys, CoordinationResult, HeartbeatConfig, RecordStore, TaskLock};
use coordinator_sync::SyncManager;

use crate::registry;

/// One heartbeat loop per held lock. The flag is flipped before the task is
/// aborted, so a tick that already woke up observes the stop and never writes
/// after release.
struct HeartbeatHandle {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Periodically refreshes `heartbeat_last` on every lock this worker holds,
/// plus a worker-level liveness record. Also hosts the staleness sweep used
/// to reclaim locks from crashed workers.
pub struct HeartbeatMonitor {
    worker_id: String,
    sync: Arc<SyncManager>,
    store: Arc<dyn RecordStore>,
    config: HeartbeatConfig,
    handles: RwLock<HashMap<String, HeartbeatHandle>>,
    degraded: AtomicBool,
}

impl HeartbeatMonitor {
    pub fn new(
        worker_id: impl Into<String>,
        sync: Arc<SyncManager>,
        store: Arc<dyn RecordStore>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            sync,
            store,
            config,
            handles: RwLock::new(HashMap::new()),
            degraded: AtomicBool::new(false),
        }
    }

    /// TTL stamped on lock and liveness entries so readers can discount
    /// records a crashed worker never cleaned up.
    pub(crate) fn entry_ttl(&self) -> Option<u64> {
        Some(self.config.stale_threshold_ms.saturating_mul(2))
    }

    /// Start heartbeating a newly-acquired lock. Restarting an already
    /// monitored task replaces its loop.
    pub async fn start(self: &Arc<Self>, task_id: &str) {
        self.stop(task_id).await;

        let active = Arc::new(AtomicBool::new(true));
        let monitor = Arc::clone(self);
        let flag = Arc::clone(&active);
        let task_id_owned = task_id.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(monitor.config.interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the initial
            // heartbeat is the one written at acquisition time.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                if !monitor.beat(&task_id_owned, &flag).await {
                    break;
                }
            }
        });

        self.handles
            .write()
            .await
            .insert(task_id.to_string(), HeartbeatHandle { active, task });
        debug!("heartbeat started for {}", task_id);
    }

    /// One heartbeat cycle. Returns false when the loop should terminate
    /// (lock gone or ownership lost).
    async fn beat(self: &Arc<Self>, task_id: &str, flag: &AtomicBool) -> bool {
        let key = keys::task_lock(task_id);
        let mut lock = match self.sync.read(&key).await {
            Ok(Some(value)) => match serde_json::from_value::<TaskLock>(value) {
                Ok(lock) => lock,
                Err(e) => {
                    warn!("unreadable lock metadata for {}: {}", task_id, e);
                    return true;
                }
            },
            Ok(None) => {
                info!("lock metadata for {} is gone, stopping heartbeat", task_id);
                return false;
            }
            Err(e) => {
                warn!("heartbeat read for {} failed: {}", task_id, e);
                return true;
            }
        };
        if !lock.owned_by(&self.worker_id) {
            warn!(
                "lock for {} now held by {}, stopping heartbeat",
                task_id, lock.worker_id
            );
            return false;
        }

        lock.touch(Utc::now());

        // The release path flips the flag first; re-check right before the
        // write so a concurrent release cannot be overwritten.
        if !flag.load(Ordering::SeqCst) {
            return false;
        }

        if let Err(e) = self.write_heartbeat(task_id, &lock).await {
            warn!(
                "heartbeat write for {} failed, retrying in {}ms: {}",
                task_id, self.config.retry_backoff_ms, e
            );
            sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
            if !flag.load(Ordering::SeqCst) {
                return false;
            }
            if let Err(e) = self.write_heartbeat(task_id, &lock).await {
                self.mark_degraded(&e.to_string()).await;
                return true;
            }
        }
        counter!("coordinator_heartbeats_total").increment(1);
        true
    }

    async fn write_heartbeat(&self, task_id: &str, lock: &TaskLock) -> CoordinationResult<()> {
        let ttl = self.entry_ttl();
        self.sync
            .write_with_ttl(&keys::task_lock(task_id), serde_json::to_value(lock)?, ttl)
            .await?;
        self.sync
            .write_with_ttl(
                &keys::worker_heartbeat(&self.worker_id),
                json!({ "at": lock.heartbeat_last }),
                ttl,
            )
            .await?;
        // Heartbeats are liveness signals; they must not linger in the batch
        // buffer behind ordinary writes.
        let report = self.sync.force_sync().await?;
        let lock_key = keys::task_lock(task_id);
        if let Some((_, detail)) = report.failed.iter().find(|(key, _)| key == &lock_key) {
            return Err(coordinator_core::CoordinationError::StoreUnavailable(
                detail.clone(),
            ));
        }
        Ok(())
    }

    /// Record persistent heartbeat failure so the balancer stops routing
    /// work here until connectivity recovers.
    async fn mark_degraded(&self, detail: &str) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!("marking worker {} degraded: {}", self.worker_id, detail);
            counter!("coordinator_worker_degraded_total").increment(1);
            if let Err(e) = self
                .sync
                .write(&keys::worker_status(&self.worker_id), json!("degraded"))
                .await
            {
                warn!("failed to record degraded status: {}", e);
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Clear the degraded flag after a successful store round-trip.
    pub async fn mark_recovered(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("worker {} recovered", self.worker_id);
            if let Err(e) = self
                .sync
                .write(&keys::worker_status(&self.worker_id), json!("healthy"))
                .await
            {
                warn!("failed to record recovered status: {}", e);
            }
        }
    }

    /// Stop heartbeating a task. Must run before lock release so no tick can
    /// resurrect metadata for a lock this worker no longer holds.
    pub async fn stop(&self, task_id: &str) {
        if let Some(handle) = self.handles.write().await.remove(task_id) {
            handle.active.store(false, Ordering::SeqCst);
            handle.task.abort();
            debug!("heartbeat stopped for {}", task_id);
        }
    }

    pub async fn stop_all(&self) {
        let mut handles = self.handles.write().await;
        for (task_id, handle) in handles.drain() {
            handle.active.store(false, Ordering::SeqCst);
            handle.task.abort();
            debug!("heartbeat stopped for {}", task_id);
        }
    }

    /// Tasks currently heartbeated by this worker.
    pub async fn held_locks(&self) -> Vec<String> {
        self.handles.read().await.keys().cloned().collect()
    }

    /// Scan the assignment registry for locks whose holder stopped
    /// heartbeating. Returns the stale task ids without mutating anything.
    ///
    /// Staleness is judged from the store, never the local cache: a cached
    /// lock entry does not see the holder's ongoing heartbeats.
    pub async fn check_stale_workers(&self) -> CoordinationResult<Vec<String>> {
        let now = Utc::now();
        let mut stale = Vec::new();
        for (task_id, holder) in registry::assigned_tasks(&self.sync).await? {
            if holder == self.worker_id {
                continue;
            }
            let key = keys::task_lock(&task_id);
            let lock = match self.sync.read_fresh(&key).await? {
                Some(value) => serde_json::from_value::<TaskLock>(value).ok(),
                None => None,
            };
            match lock {
                Some(lock) if lock.is_stale(now, self.config.stale_threshold_ms) => {
                    debug!(
                        "lock on {} held by {} is stale (last heartbeat {})",
                        task_id, holder, lock.heartbeat_last
                    );
                    stale.push(task_id);
                }
                // Metadata missing or unreadable: treat the probe time as
                // the heartbeat, so an assignment alone is never reclaimed
                // the instant it is observed.
                _ => {}
            }
        }
        Ok(stale)
    }

    /// Reclaim one stale lock: clear the authoritative assignment, tombstone
    /// the metadata and drop the registry entry. Returns false when the lock
    /// is absent or its holder is still fresh.
    ///
    /// This is the only path where a non-owner mutates another worker's lock.
    pub async fn recover_stale_lock(&self, task_id: &str) -> CoordinationResult<bool> {
        let key = keys::task_lock(task_id);
        // Fresh read: reclaiming from a live holder on cached metadata would
        // hand the task to two workers at once.
        let lock = match self.sync.read_fresh(&key).await? {
            Some(value) => serde_json::from_value::<TaskLock>(value).ok(),
            None => None,
        };
        let stale = match &lock {
            Some(lock) => lock.is_stale(Utc::now(), self.config.stale_threshold_ms),
            None => false,
        };
        if !stale {
            return Ok(false);
        }
        let holder = lock.map(|l| l.worker_id).unwrap_or_default();
        info!(
            "recovering stale lock on {} from {} (worker {})",
            task_id, holder, self.worker_id
        );
        counter!("coordinator_locks_recovered_total").increment(1);

        self.store.clear_assignment(task_id).await?;
        self.sync.delete(&key).await?;
        registry::unregister(&self.sync, task_id).await?;
        self.sync.force_sync().await?;
        Ok(true)
    }

    /// Final liveness write on shutdown so peers learn this worker is gone
    /// without waiting for staleness.
    pub async fn shutdown(&self) -> CoordinationResult<()> {
        self.stop_all().await;
        self.sync
            .write(&keys::worker_status(&self.worker_id), json!("unhealthy"))
            .await?;
        self.sync.force_sync().await?;
        Ok(())
    }
}
