pub mod context;
pub mod queue;
pub mod scoring;
pub mod strategies;

pub use context::BalancingContext;
pub use queue::MigrationSuggestion;
pub use scoring::{ScoreWeights, WorkerScore};
pub use strategies::{SelectionStrategy, StrategyRegistry};

use std::sync::Arc;

use metrics::counter;
use tokio::sync::RwLock;
use tracing::info;

use coordinator_core::{
    BalancerConfig, CoordinationError, CoordinationResult, QueuedTask, TaskRequirements,
    WorkerSnapshot,
};

/// Worker selection facade: one shared learning context, a registry of
/// strategies and a runtime-swappable active strategy. Wrong choices here
/// degrade throughput, never correctness; mutual exclusion stays with the
/// lock manager.
pub struct LoadBalancer {
    config: BalancerConfig,
    context: Arc<BalancingContext>,
    registry: StrategyRegistry,
    active: RwLock<Arc<dyn SelectionStrategy>>,
}

impl LoadBalancer {
    pub fn new(config: BalancerConfig) -> CoordinationResult<Self> {
        let registry = StrategyRegistry::default();
        let active = registry.get(&config.strategy).ok_or_else(|| {
            CoordinationError::Configuration(format!(
                "unknown balancing strategy: {}",
                config.strategy
            ))
        })?;
        Ok(Self {
            context: Arc::new(BalancingContext::new(&config)),
            config,
            registry,
            active: RwLock::new(active),
        })
    }

    /// Pick a worker for the task, `None` when no worker is eligible.
    pub async fn select_worker(
        &self,
        task: &TaskRequirements,
        workers: &[WorkerSnapshot],
    ) -> CoordinationResult<Option<String>> {
        let strategy = Arc::clone(&*self.active.read().await);
        let selected = strategy.select_worker(task, workers, &self.context).await?;
        match &selected {
            Some(worker_id) => {
                counter!("coordinator_balancer_selections_total").increment(1);
                tracing::debug!("{} selected {} for task", strategy.name(), worker_id);
            }
            None => {
                counter!("coordinator_balancer_no_eligible_total").increment(1);
            }
        }
        Ok(selected)
    }

    /// Composite scores for every eligible worker, best first, under the
    /// context's current weight vector.
    pub fn score_workers(
        &self,
        task: &TaskRequirements,
        workers: &[WorkerSnapshot],
    ) -> Vec<WorkerScore> {
        let weights = self.context.current_weights();
        scoring::score_workers(workers, task, &self.context, &weights)
    }

    /// Feed an outcome back into the learning context.
    pub fn update_context(
        &self,
        worker_id: &str,
        task_type: Option<&str>,
        success: bool,
        duration_ms: u64,
    ) {
        self.context
            .record_outcome(worker_id, task_type, success, duration_ms);
    }

    /// Swap the active strategy by name. The learning context is shared, so
    /// nothing is lost for in-flight tasks.
    pub async fn set_strategy(&self, name: &str) -> CoordinationResult<()> {
        let strategy = self.registry.get(name).ok_or_else(|| {
            CoordinationError::Configuration(format!("unknown balancing strategy: {name}"))
        })?;
        info!("balancing strategy switched to {}", name);
        *self.active.write().await = strategy;
        Ok(())
    }

    pub async fn strategy_name(&self) -> &'static str {
        self.active.read().await.name()
    }

    pub fn detect_overload(&self, workers: &[WorkerSnapshot]) -> Vec<String> {
        queue::detect_overload(workers, self.config.overload_threshold)
    }

    pub fn suggest_migrations(
        &self,
        queued: &[QueuedTask],
        workers: &[WorkerSnapshot],
    ) -> Vec<MigrationSuggestion> {
        queue::suggest_migrations(
            queued,
            workers,
            &self.context,
            self.config.overload_threshold,
        )
    }

    pub fn reorder_queue(&self, queued: &mut [QueuedTask], workers: &[WorkerSnapshot]) {
        queue::reorder_queue(queued, workers);
    }

    /// Expected wait for the queued task at `index`, in units of tasks per
    /// idle slot.
    pub fn expected_wait(
        &self,
        queued: &[QueuedTask],
        index: usize,
        workers: &[WorkerSnapshot],
    ) -> f64 {
        queue::expected_wait(queued, index, workers)
    }

    pub fn context(&self) -> &BalancingContext {
        &self.context
    }
}
