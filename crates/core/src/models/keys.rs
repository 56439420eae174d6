//! Hierarchical key layout of the synchronized key/value space.
//!
//! Keys are slash-separated paths: `tasks/{id}/{state|lock|progress}`,
//! `workers/{id}/{status|heartbeat|capacity}` and `coordination/{...}`.
//! Entries persist into the record store under a per-entity topic derived
//! from the first two path segments.

pub fn task_state(task_id: &str) -> String {
    format!("tasks/{task_id}/state")
}

pub fn task_lock(task_id: &str) -> String {
    format!("tasks/{task_id}/lock")
}

pub fn task_progress(task_id: &str) -> String {
    format!("tasks/{task_id}/progress")
}

pub fn task_agent(task_id: &str, agent_id: &str) -> String {
    format!("tasks/{task_id}/agents/{agent_id}")
}

pub fn worker_status(worker_id: &str) -> String {
    format!("workers/{worker_id}/status")
}

pub fn worker_heartbeat(worker_id: &str) -> String {
    format!("workers/{worker_id}/heartbeat")
}

pub fn worker_capacity(worker_id: &str) -> String {
    format!("workers/{worker_id}/capacity")
}

pub fn coordination_queue() -> String {
    "coordination/queue".to_string()
}

pub fn coordination_assignment(task_id: &str) -> String {
    format!("coordination/assignments/{task_id}")
}

pub fn coordination_metrics() -> String {
    "coordination/metrics".to_string()
}

/// Record-store topic a key persists under: the first two path segments,
/// or the first when the key has no entity id (`coordination/...`).
pub fn topic_for(key: &str) -> String {
    let mut segments = key.split('/');
    match (segments.next(), segments.next()) {
        (Some("coordination"), _) => "coordination".to_string(),
        (Some(ns), Some(id)) => format!("{ns}/{id}"),
        (Some(ns), None) => ns.to_string(),
        (None, _) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_constructors() {
        assert_eq!(task_lock("42"), "tasks/42/lock");
        assert_eq!(task_agent("42", "a1"), "tasks/42/agents/a1");
        assert_eq!(worker_heartbeat("w1"), "workers/w1/heartbeat");
        assert_eq!(coordination_queue(), "coordination/queue");
        assert_eq!(
            coordination_assignment("42"),
            "coordination/assignments/42"
        );
    }

    #[test]
    fn topics_group_keys_per_entity() {
        assert_eq!(topic_for("tasks/42/lock"), "tasks/42");
        assert_eq!(topic_for("tasks/42/agents/a1"), "tasks/42");
        assert_eq!(topic_for("workers/w1/status"), "workers/w1");
        assert_eq!(topic_for("coordination/queue"), "coordination");
        assert_eq!(topic_for("coordination/metrics"), "coordination");
    }
}
