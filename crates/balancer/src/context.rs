use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use coordinator_core::{BalancerConfig, CoordinationError, CoordinationResult};

use crate::scoring::{ScoreWeights, WorkerScore};

const UNTYPED: &str = "_untyped";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Outcome {
    success: bool,
    duration_ms: u64,
}

/// Everything the balancer learns across selections: outcome history per
/// (worker, task type), sticky affinities and the adaptive weight vector.
/// State lives here, not in the strategies, so swapping the active strategy
/// at runtime loses nothing.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextInner {
    outcomes: HashMap<String, VecDeque<Outcome>>,
    /// Learned association per (worker, task type), 0..1, EMA of success.
    affinities: HashMap<String, f64>,
    weights: ScoreWeights,
    samples: usize,
    /// Component scores of the most recent selection per worker, consumed
    /// by the adaptive weight update when the outcome arrives.
    #[serde(skip)]
    last_scores: HashMap<String, WorkerScore>,
}

pub struct BalancingContext {
    history_window: usize,
    learning_rate: f64,
    min_samples: usize,
    inner: Mutex<ContextInner>,
}

impl BalancingContext {
    pub fn new(config: &BalancerConfig) -> Self {
        Self {
            history_window: config.history_window,
            learning_rate: config.learning_rate,
            min_samples: config.min_samples,
            inner: Mutex::new(ContextInner::default()),
        }
    }

    fn key(worker_id: &str, task_type: Option<&str>) -> String {
        format!("{}::{}", worker_id, task_type.unwrap_or(UNTYPED))
    }

    /// Feed back the outcome of a completed (or failed) task. Updates the
    /// bounded history window, the sticky affinity and, once enough samples
    /// exist, the adaptive weights.
    pub fn record_outcome(
        &self,
        worker_id: &str,
        task_type: Option<&str>,
        success: bool,
        duration_ms: u64,
    ) {
        let mut inner = self.lock();
        let key = Self::key(worker_id, task_type);

        let window = inner.outcomes.entry(key.clone()).or_default();
        window.push_back(Outcome {
            success,
            duration_ms,
        });
        while window.len() > self.history_window {
            window.pop_front();
        }

        let target = if success { 1.0 } else { 0.0 };
        let affinity = inner.affinities.entry(key).or_insert(0.5);
        *affinity += 0.2 * (target - *affinity);

        inner.samples += 1;
        if let Some(score) = inner.last_scores.get(worker_id).cloned() {
            let error = target - score.total;
            let mut weights = inner.weights;
            weights.capacity += self.learning_rate * error * score.capacity;
            weights.performance += self.learning_rate * error * score.performance;
            weights.affinity += self.learning_rate * error * score.affinity;
            weights.reliability += self.learning_rate * error * score.reliability;
            inner.weights = weights.normalized();
            debug!(
                "adaptive weights after {} samples: {:?}",
                inner.samples, inner.weights
            );
        }
    }

    /// Success rate over the recorded window, `None` before any history.
    pub fn success_rate(&self, worker_id: &str, task_type: Option<&str>) -> Option<f64> {
        let inner = self.lock();
        let window = inner.outcomes.get(&Self::key(worker_id, task_type))?;
        if window.is_empty() {
            return None;
        }
        let successes = window.iter().filter(|o| o.success).count();
        Some(successes as f64 / window.len() as f64)
    }

    /// Average duration over the recorded window, `None` before any history.
    pub fn avg_duration_ms(&self, worker_id: &str, task_type: Option<&str>) -> Option<f64> {
        let inner = self.lock();
        let window = inner.outcomes.get(&Self::key(worker_id, task_type))?;
        if window.is_empty() {
            return None;
        }
        let total: u64 = window.iter().map(|o| o.duration_ms).sum();
        Some(total as f64 / window.len() as f64)
    }

    /// Learned sticky association, neutral 0.5 before any history.
    pub fn affinity(&self, worker_id: &str, task_type: Option<&str>) -> f64 {
        self.lock()
            .affinities
            .get(&Self::key(worker_id, task_type))
            .copied()
            .unwrap_or(0.5)
    }

    /// Active weight vector: the defaults until `min_samples` outcomes have
    /// been observed (cold start), the learned weights after.
    pub fn current_weights(&self) -> ScoreWeights {
        let inner = self.lock();
        if inner.samples < self.min_samples {
            ScoreWeights::default()
        } else {
            inner.weights
        }
    }

    /// Remember the components behind a selection so the eventual outcome
    /// can be attributed to them.
    pub fn note_selection(&self, score: &WorkerScore) {
        self.lock()
            .last_scores
            .insert(score.worker_id.clone(), score.clone());
    }

    pub fn samples(&self) -> usize {
        self.lock().samples
    }

    /// Serialize the learned state for persistence through memory sync.
    pub fn snapshot(&self) -> CoordinationResult<Value> {
        serde_json::to_value(&*self.lock()).map_err(CoordinationError::from)
    }

    /// Restore previously persisted state, replacing the current contents.
    pub fn restore(&self, snapshot: Value) -> CoordinationResult<()> {
        let restored: ContextInner =
            serde_json::from_value(snapshot).map_err(CoordinationError::from)?;
        *self.lock() = restored;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ContextInner> {
        // Lock poisoning would mean a panic mid-update; the state is
        // advisory, so continuing with it is safe.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> BalancingContext {
        BalancingContext::new(&BalancerConfig {
            history_window: 3,
            min_samples: 2,
            ..Default::default()
        })
    }

    #[test]
    fn history_window_is_bounded() {
        let ctx = context();
        for _ in 0..5 {
            ctx.record_outcome("w1", Some("build"), false, 100);
        }
        ctx.record_outcome("w1", Some("build"), true, 100);
        // Window of 3: two failures rolled out, [fail, fail, success] remain.
        let rate = ctx.success_rate("w1", Some("build")).unwrap();
        assert!((rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn task_types_are_tracked_separately() {
        let ctx = context();
        ctx.record_outcome("w1", Some("build"), true, 100);
        ctx.record_outcome("w1", Some("deploy"), false, 100);
        assert_eq!(ctx.success_rate("w1", Some("build")), Some(1.0));
        assert_eq!(ctx.success_rate("w1", Some("deploy")), Some(0.0));
        assert_eq!(ctx.success_rate("w1", None), None);
    }

    #[test]
    fn cold_start_uses_default_weights() {
        let ctx = context();
        ctx.record_outcome("w1", None, true, 100);
        assert_eq!(ctx.current_weights(), ScoreWeights::default());
        ctx.record_outcome("w1", None, true, 100);
        // min_samples reached; learned weights (still the defaults, since no
        // selection was noted) become active.
        let _ = ctx.current_weights();
        assert_eq!(ctx.samples(), 2);
    }

    #[test]
    fn failures_push_affinity_down() {
        let ctx = context();
        for _ in 0..5 {
            ctx.record_outcome("w1", Some("build"), false, 100);
        }
        assert!(ctx.affinity("w1", Some("build")) < 0.5);
        assert_eq!(ctx.affinity("w2", Some("build")), 0.5);
    }

    #[test]
    fn snapshot_round_trips_learned_state() {
        let ctx = context();
        ctx.record_outcome("w1", Some("build"), true, 250);
        let snapshot = ctx.snapshot().unwrap();

        let fresh = context();
        fresh.restore(snapshot).unwrap();
        assert_eq!(fresh.success_rate("w1", Some("build")), Some(1.0));
        assert_eq!(fresh.samples(), 1);
    }
}
