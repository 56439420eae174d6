use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use coordinator_core::{QueuedTask, WorkerSnapshot};

use crate::context::BalancingContext;
use crate::scoring;

/// Proposal to move a queued-but-unstarted task off an overloaded worker.
/// Advisory output; acting on it is the orchestration layer's call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSuggestion {
    pub task_id: String,
    pub from: String,
    pub to: String,
    pub score: f64,
}

/// Workers whose load ratio exceeds the threshold, in id order.
pub fn detect_overload(workers: &[WorkerSnapshot], threshold: f64) -> Vec<String> {
    let mut overloaded: Vec<String> = workers
        .iter()
        .filter(|worker| worker.load_ratio() > threshold)
        .map(|worker| worker.id.clone())
        .collect();
    overloaded.sort_unstable();
    overloaded
}

/// Propose moving queued tasks away from overloaded workers toward the best
/// eligible underloaded target, ranked by composite score. Tasks already
/// running are not the queue's to move; only unstarted entries appear here.
pub fn suggest_migrations(
    queue: &[QueuedTask],
    workers: &[WorkerSnapshot],
    context: &BalancingContext,
    threshold: f64,
) -> Vec<MigrationSuggestion> {
    let overloaded = detect_overload(workers, threshold);
    let mut suggestions = Vec::new();

    for task in queue {
        let from = match &task.assigned_to {
            Some(worker_id) if overloaded.contains(worker_id) => worker_id.clone(),
            _ => continue,
        };
        let weights = context.current_weights();
        let best = scoring::score_workers(workers, &task.requirements, context, &weights)
            .into_iter()
            .find(|score| {
                score.worker_id != from && !overloaded.contains(&score.worker_id)
            });
        if let Some(target) = best {
            debug!(
                "suggesting migration of {} from {} to {}",
                task.task_id, from, target.worker_id
            );
            suggestions.push(MigrationSuggestion {
                task_id: task.task_id.clone(),
                from,
                to: target.worker_id,
                score: target.total,
            });
        }
    }

    suggestions.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
    suggestions
}

/// Order the queue for dispatch: priority descending, then by the expected
/// wait each task carried at its incoming position. Within a priority band
/// the wait grows with queue position, so equal-priority tasks keep
/// first-come-first-served order whatever shape the input arrived in.
pub fn reorder_queue(queue: &mut [QueuedTask], workers: &[WorkerSnapshot]) {
    let incoming: &[QueuedTask] = queue;
    let waits: HashMap<String, f64> = (0..incoming.len())
        .map(|index| {
            (
                incoming[index].task_id.clone(),
                expected_wait(incoming, index, workers),
            )
        })
        .collect();
    queue.sort_by(|a, b| {
        b.requirements
            .priority
            .cmp(&a.requirements.priority)
            .then_with(|| {
                let wait_a = waits.get(&a.task_id).copied().unwrap_or(0.0);
                let wait_b = waits.get(&b.task_id).copied().unwrap_or(0.0);
                wait_a.partial_cmp(&wait_b).unwrap_or(std::cmp::Ordering::Equal)
            })
    });
}

/// Expected wait for the task at `index` in an already-ordered queue: the
/// number of equal-or-higher-priority tasks ahead of it, divided by the
/// pool's idle capacity.
pub fn expected_wait(queue: &[QueuedTask], index: usize, workers: &[WorkerSnapshot]) -> f64 {
    let priority = match queue.get(index) {
        Some(task) => task.requirements.priority,
        None => return 0.0,
    };
    let ahead = queue[..index]
        .iter()
        .filter(|task| task.requirements.priority >= priority)
        .count();
    let idle_capacity: u32 = workers
        .iter()
        .filter(|worker| worker.is_available())
        .map(|worker| worker.remaining_capacity())
        .sum();
    ahead as f64 / idle_capacity.max(1) as f64
}
