use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use coordinator_core::{CoordinationResult, TaskRequirements, WorkerSnapshot};

use crate::context::BalancingContext;
use crate::scoring;

/// One worker-selection policy. Strategies are stateless with respect to
/// learning; everything learned lives in the shared [`BalancingContext`],
/// so the active strategy can be swapped at runtime with no state loss.
///
/// Returning `Ok(None)` means no eligible worker, a normal scheduling
/// outcome rather than an error.
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn select_worker(
        &self,
        task: &TaskRequirements,
        workers: &[WorkerSnapshot],
        context: &BalancingContext,
    ) -> CoordinationResult<Option<String>>;
}

/// Cycles eligible workers in id order.
#[derive(Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

#[async_trait]
impl SelectionStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    async fn select_worker(
        &self,
        task: &TaskRequirements,
        workers: &[WorkerSnapshot],
        _context: &BalancingContext,
    ) -> CoordinationResult<Option<String>> {
        let eligible = scoring::eligible_workers(workers, task);
        if eligible.is_empty() {
            return Ok(None);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % eligible.len();
        Ok(Some(eligible[index].id.clone()))
    }
}

/// Minimum load ratio, ties broken by worker id.
#[derive(Default)]
pub struct LeastLoaded;

#[async_trait]
impl SelectionStrategy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    async fn select_worker(
        &self,
        task: &TaskRequirements,
        workers: &[WorkerSnapshot],
        _context: &BalancingContext,
    ) -> CoordinationResult<Option<String>> {
        Ok(least_loaded_of(scoring::eligible_workers(workers, task)))
    }
}

/// The capability superset filter is part of eligibility; among survivors
/// this behaves as least-loaded.
#[derive(Default)]
pub struct CapabilityBased;

#[async_trait]
impl SelectionStrategy for CapabilityBased {
    fn name(&self) -> &'static str {
        "capability_based"
    }

    async fn select_worker(
        &self,
        task: &TaskRequirements,
        workers: &[WorkerSnapshot],
        _context: &BalancingContext,
    ) -> CoordinationResult<Option<String>> {
        Ok(least_loaded_of(scoring::eligible_workers(workers, task)))
    }
}

/// Maximum performance times reliability; capacity only gates eligibility.
#[derive(Default)]
pub struct PerformanceBased;

#[async_trait]
impl SelectionStrategy for PerformanceBased {
    fn name(&self) -> &'static str {
        "performance_based"
    }

    async fn select_worker(
        &self,
        task: &TaskRequirements,
        workers: &[WorkerSnapshot],
        context: &BalancingContext,
    ) -> CoordinationResult<Option<String>> {
        let best = scoring::eligible_workers(workers, task)
            .into_iter()
            .map(|worker| {
                let score = scoring::performance_score(worker, task, context)
                    * scoring::reliability_score(worker);
                (worker.id.clone(), score)
            })
            // Eligible workers arrive in id order; strictly-greater keeps
            // the smaller id on ties.
            .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best });
        Ok(best.map(|(id, _)| id))
    }
}

/// Full composite scoring under the context's learned weight vector, with
/// the default weights during cold start.
#[derive(Default)]
pub struct Adaptive;

#[async_trait]
impl SelectionStrategy for Adaptive {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    async fn select_worker(
        &self,
        task: &TaskRequirements,
        workers: &[WorkerSnapshot],
        context: &BalancingContext,
    ) -> CoordinationResult<Option<String>> {
        let weights = context.current_weights();
        let scores = scoring::score_workers(workers, task, context, &weights);
        Ok(scores.into_iter().next().map(|score| {
            context.note_selection(&score);
            score.worker_id
        }))
    }
}

/// Name-indexed strategy registry. Adding a strategy means registering it
/// here, not editing a dispatch chain.
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Arc<dyn SelectionStrategy>>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register(Arc::new(RoundRobin::default()));
        registry.register(Arc::new(LeastLoaded));
        registry.register(Arc::new(CapabilityBased));
        registry.register(Arc::new(PerformanceBased));
        registry.register(Arc::new(Adaptive));
        registry
    }
}

impl StrategyRegistry {
    pub fn register(&mut self, strategy: Arc<dyn SelectionStrategy>) {
        self.strategies.insert(strategy.name(), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SelectionStrategy>> {
        self.strategies.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.strategies.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

fn least_loaded_of(eligible: Vec<&WorkerSnapshot>) -> Option<String> {
    eligible
        .into_iter()
        .reduce(|best, candidate| {
            if candidate.load_ratio() < best.load_ratio() {
                candidate
            } else {
                best
            }
        })
        .map(|worker| worker.id.clone())
}
