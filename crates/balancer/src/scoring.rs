use serde::{Deserialize, Serialize};

use coordinator_core::{TaskRequirements, WorkerSnapshot};

use crate::context::BalancingContext;

/// Per-factor weights applied to the composite score. The fixed defaults are
/// used by every strategy except `Adaptive`, which learns its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub capacity: f64,
    pub performance: f64,
    pub affinity: f64,
    pub reliability: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            capacity: 0.4,
            performance: 0.3,
            affinity: 0.2,
            reliability: 0.1,
        }
    }
}

impl ScoreWeights {
    /// Clamp each factor away from zero and renormalize to sum 1, keeping
    /// the learned weights bounded no matter what the update step did.
    pub fn normalized(mut self) -> Self {
        self.capacity = self.capacity.clamp(0.05, 0.7);
        self.performance = self.performance.clamp(0.05, 0.7);
        self.affinity = self.affinity.clamp(0.05, 0.7);
        self.reliability = self.reliability.clamp(0.05, 0.7);
        let sum = self.capacity + self.performance + self.affinity + self.reliability;
        self.capacity /= sum;
        self.performance /= sum;
        self.affinity /= sum;
        self.reliability /= sum;
        self
    }
}

/// Component and composite scores for one eligible worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerScore {
    pub worker_id: String,
    pub total: f64,
    pub capacity: f64,
    pub performance: f64,
    pub affinity: f64,
    pub reliability: f64,
}

/// Hard constraints checked before any scoring. An ineligible worker is
/// never selected, whatever the strategy.
pub fn is_eligible(worker: &WorkerSnapshot, task: &TaskRequirements) -> bool {
    if !worker.is_available() {
        return false;
    }
    if task.anti_affinity.iter().any(|id| id == &worker.id) {
        return false;
    }
    if !task
        .required_capabilities
        .iter()
        .all(|cap| worker.has_capability(cap))
    {
        return false;
    }
    worker.remaining_capacity() >= task.complexity.max(1)
}

/// Workers passing the eligibility filter, in deterministic id order.
pub fn eligible_workers<'a>(
    workers: &'a [WorkerSnapshot],
    task: &TaskRequirements,
) -> Vec<&'a WorkerSnapshot> {
    let mut eligible: Vec<&WorkerSnapshot> = workers
        .iter()
        .filter(|worker| is_eligible(worker, task))
        .collect();
    eligible.sort_by(|a, b| a.id.cmp(&b.id));
    eligible
}

/// Headroom relative to the task's complexity: at twice the demand the
/// factor saturates at 1.
pub fn capacity_score(worker: &WorkerSnapshot, task: &TaskRequirements) -> f64 {
    let demand = task.complexity.max(1) as f64;
    (worker.remaining_capacity() as f64 / (2.0 * demand)).min(1.0)
}

/// Historical success rate for this task type, falling back to the
/// worker-reported rate when the context has no history yet.
pub fn performance_score(
    worker: &WorkerSnapshot,
    task: &TaskRequirements,
    context: &BalancingContext,
) -> f64 {
    context
        .success_rate(&worker.id, task.task_type.as_deref())
        .unwrap_or(worker.metrics.success_rate)
        .clamp(0.0, 1.0)
}

/// Caller-declared affinity averaged with the learned sticky association.
/// Anti-affinity never reaches here; it is an eligibility constraint.
pub fn affinity_score(
    worker: &WorkerSnapshot,
    task: &TaskRequirements,
    context: &BalancingContext,
) -> f64 {
    let declared = if task.affinity.iter().any(|id| id == &worker.id) {
        1.0
    } else {
        0.5
    };
    let learned = context.affinity(&worker.id, task.task_type.as_deref());
    (declared + learned) / 2.0
}

/// Faster average completion and longer uptime both read as reliability.
pub fn reliability_score(worker: &WorkerSnapshot) -> f64 {
    let speed = 1.0 / (1.0 + worker.metrics.avg_duration_ms / 60_000.0);
    let uptime = (worker.metrics.uptime_secs as f64 / 3_600.0).min(1.0);
    0.5 * speed + 0.5 * uptime
}

pub fn score_worker(
    worker: &WorkerSnapshot,
    task: &TaskRequirements,
    context: &BalancingContext,
    weights: &ScoreWeights,
) -> WorkerScore {
    let capacity = capacity_score(worker, task);
    let performance = performance_score(worker, task, context);
    let affinity = affinity_score(worker, task, context);
    let reliability = reliability_score(worker);
    WorkerScore {
        worker_id: worker.id.clone(),
        total: weights.capacity * capacity
            + weights.performance * performance
            + weights.affinity * affinity
            + weights.reliability * reliability,
        capacity,
        performance,
        affinity,
        reliability,
    }
}

/// Score every eligible worker, sorted best-first with id as the
/// deterministic tie-break.
pub fn score_workers(
    workers: &[WorkerSnapshot],
    task: &TaskRequirements,
    context: &BalancingContext,
    weights: &ScoreWeights,
) -> Vec<WorkerScore> {
    let mut scores: Vec<WorkerScore> = eligible_workers(workers, task)
        .into_iter()
        .map(|worker| score_worker(worker, task, context, weights))
        .collect();
    scores.sort_by(|a, b| {
        b.total
            .partial_cmp(&a.total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.worker_id.cmp(&b.worker_id))
    });
    scores
}
