use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use coordinator_balancer::{LoadBalancer, MigrationSuggestion, WorkerScore};
use coordinator_core::{
    CoordinationConfig, CoordinationError, CoordinationResult, LockOutcome, LockStatus,
    LockStrategy, QueuedTask, RecordStore, TaskInfo, TaskRequirements, WorkerSnapshot,
};
use coordinator_lock::{HeartbeatMonitor, LockManager, LockMetrics};
use coordinator_sync::{ChangeCallback, FlushReport, SubscriptionId, SyncManager, SyncStats};

use crate::shutdown::ShutdownManager;

/// Combined metrics snapshot across all components.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinationMetrics {
    pub worker_id: String,
    pub node_id: String,
    pub captured_at: DateTime<Utc>,
    pub locks: LockMetricsView,
    pub sync: SyncStatsView,
    pub balancer_samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockMetricsView {
    pub acquired: u64,
    pub released: u64,
    pub conflicts: u64,
    pub retries: u64,
    pub failed: u64,
    pub stolen: u64,
    pub avg_acquire_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatsView {
    pub reads: u64,
    pub writes: u64,
    pub store_reads: u64,
    pub flushes: u64,
    pub conflicts_resolved: u64,
    pub pending_writes: usize,
}

/// One coordination context per worker process, explicitly constructed and
/// passed by reference; there is no ambient global instance. Wires the
/// synchronized memory, lock manager, heartbeat monitor and load balancer
/// over one shared record store.
pub struct CoordinationContext {
    worker_id: String,
    node_id: String,
    sync: Arc<SyncManager>,
    heartbeat: Arc<HeartbeatMonitor>,
    locks: Arc<LockManager>,
    balancer: LoadBalancer,
    shutdown: ShutdownManager,
}

impl CoordinationContext {
    pub fn new(
        config: CoordinationConfig,
        store: Arc<dyn RecordStore>,
    ) -> CoordinationResult<Self> {
        config
            .validate()
            .map_err(|e| CoordinationError::Configuration(e.to_string()))?;

        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", short_uuid()));
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        let node_id = format!("{host}-{}", short_uuid());

        let sync = Arc::new(SyncManager::new(
            worker_id.clone(),
            Arc::clone(&store),
            config.sync.clone(),
        ));
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            worker_id.clone(),
            Arc::clone(&sync),
            Arc::clone(&store),
            config.heartbeat.clone(),
        ));
        let locks = Arc::new(LockManager::new(
            worker_id.clone(),
            node_id.clone(),
            store,
            Arc::clone(&sync),
            Arc::clone(&heartbeat),
            config.lock.clone(),
        ));
        let balancer = LoadBalancer::new(config.balancer.clone())?;

        info!("coordination context ready: worker {} on {}", worker_id, node_id);
        Ok(Self {
            worker_id,
            node_id,
            sync,
            heartbeat,
            locks,
            balancer,
            shutdown: ShutdownManager::new(),
        })
    }

    /// Start the background flush loop. Call once after construction.
    pub async fn start(&self) {
        self.sync
            .start_flush_task(self.shutdown.subscribe().await)
            .await;
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn sync(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeat
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    // ---- lock protocol -------------------------------------------------

    pub async fn acquire_lock(
        &self,
        task_id: &str,
        task_info: TaskInfo,
        strategy: LockStrategy,
    ) -> CoordinationResult<LockOutcome> {
        self.locks.acquire_lock(task_id, task_info, strategy).await
    }

    pub async fn release_lock(&self, task_id: &str) -> CoordinationResult<()> {
        self.locks.release_lock(task_id).await
    }

    pub async fn get_lock_status(&self, task_id: &str) -> CoordinationResult<LockStatus> {
        self.locks.get_lock_status(task_id).await
    }

    pub async fn check_stale_workers(&self) -> CoordinationResult<Vec<String>> {
        self.heartbeat.check_stale_workers().await
    }

    pub async fn recover_stale_lock(&self, task_id: &str) -> CoordinationResult<bool> {
        self.heartbeat.recover_stale_lock(task_id).await
    }

    // ---- worker selection ----------------------------------------------

    pub async fn select_worker(
        &self,
        task: &TaskRequirements,
        workers: &[WorkerSnapshot],
    ) -> CoordinationResult<Option<String>> {
        self.balancer.select_worker(task, workers).await
    }

    pub fn score_workers(
        &self,
        task: &TaskRequirements,
        workers: &[WorkerSnapshot],
    ) -> Vec<WorkerScore> {
        self.balancer.score_workers(task, workers)
    }

    pub fn update_context(
        &self,
        worker_id: &str,
        task_type: Option<&str>,
        success: bool,
        duration_ms: u64,
    ) {
        self.balancer
            .update_context(worker_id, task_type, success, duration_ms);
    }

    pub fn detect_overload(&self, workers: &[WorkerSnapshot]) -> Vec<String> {
        self.balancer.detect_overload(workers)
    }

    pub fn suggest_migrations(
        &self,
        queued: &[QueuedTask],
        workers: &[WorkerSnapshot],
    ) -> Vec<MigrationSuggestion> {
        self.balancer.suggest_migrations(queued, workers)
    }

    pub fn reorder_queue(&self, queued: &mut [QueuedTask], workers: &[WorkerSnapshot]) {
        self.balancer.reorder_queue(queued, workers);
    }

    // ---- synchronized memory -------------------------------------------

    pub async fn read(&self, key: &str) -> CoordinationResult<Option<Value>> {
        self.sync.read(key).await
    }

    pub async fn write(&self, key: &str, value: Value) -> CoordinationResult<()> {
        self.sync.write(key, value).await.map(|_| ())
    }

    pub async fn delete(&self, key: &str) -> CoordinationResult<()> {
        self.sync.delete(key).await.map(|_| ())
    }

    pub async fn subscribe(&self, pattern: &str, callback: ChangeCallback) -> SubscriptionId {
        self.sync.subscribe(pattern, callback).await
    }

    pub async fn force_sync(&self) -> CoordinationResult<FlushReport> {
        self.sync.force_sync().await
    }

    // ---- observability and lifecycle -----------------------------------

    pub async fn get_metrics(&self) -> CoordinationMetrics {
        let locks: LockMetrics = self.locks.metrics().await;
        let sync: SyncStats = self.sync.stats().await;
        CoordinationMetrics {
            worker_id: self.worker_id.clone(),
            node_id: self.node_id.clone(),
            captured_at: Utc::now(),
            locks: LockMetricsView {
                acquired: locks.acquired,
                released: locks.released,
                conflicts: locks.conflicts,
                retries: locks.retries,
                failed: locks.failed,
                stolen: locks.stolen,
                avg_acquire_latency_ms: locks.avg_acquire_latency_ms,
            },
            sync: SyncStatsView {
                reads: sync.reads,
                writes: sync.writes,
                store_reads: sync.store_reads,
                flushes: sync.flushes,
                conflicts_resolved: sync.conflicts_resolved,
                pending_writes: sync.pending_writes,
            },
            balancer_samples: self.balancer.context().samples(),
        }
    }

    /// Best-effort graceful shutdown bounded by `grace`: release held locks,
    /// publish the final liveness state and drain pending writes. On timeout
    /// the process may leave stale locks behind; peers reclaim them through
    /// staleness detection.
    pub async fn shutdown(&self, grace: Duration) {
        info!("shutting down worker {} (grace {:?})", self.worker_id, grace);
        self.shutdown.trigger().await;

        let cleanup = async {
            let released = self.locks.release_all().await;
            if !released.is_empty() {
                info!("released {} locks on shutdown", released.len());
            }
            if let Err(e) = self.heartbeat.shutdown().await {
                warn!("final heartbeat update failed: {}", e);
            }
            if let Err(e) = self.sync.shutdown().await {
                warn!("final flush failed: {}", e);
            }
        };
        if timeout(grace, cleanup).await.is_err() {
            warn!(
                "shutdown grace period elapsed for worker {}, exiting anyway",
                self.worker_id
            );
        }
    }
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
