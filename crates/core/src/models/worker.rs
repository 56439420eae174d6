use serde::{Deserialize, Serialize};

/// Point-in-time view of a worker, produced by the registry outside this
/// core and consumed by the load balancer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSnapshot {
    pub id: String,
    pub capabilities: Vec<String>,
    pub max_capacity: u32,
    pub current_load: u32,
    pub status: WorkerStatus,
    #[serde(default)]
    pub metrics: WorkerMetrics,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Overloaded,
    Offline,
}

/// Rolling performance figures reported alongside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerMetrics {
    pub success_rate: f64,
    pub failure_rate: f64,
    pub avg_duration_ms: f64,
    pub completed: u64,
    pub failed: u64,
    pub uptime_secs: u64,
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            failure_rate: 0.0,
            avg_duration_ms: 0.0,
            completed: 0,
            failed: 0,
            uptime_secs: 0,
        }
    }
}

impl WorkerSnapshot {
    pub fn is_available(&self) -> bool {
        self.status != WorkerStatus::Offline
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.max_capacity.saturating_sub(self.current_load)
    }

    pub fn load_ratio(&self) -> f64 {
        if self.max_capacity == 0 {
            1.0
        } else {
            self.current_load as f64 / self.max_capacity as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> WorkerSnapshot {
        WorkerSnapshot {
            id: "worker-a".to_string(),
            capabilities: vec!["build".to_string(), "gpu".to_string()],
            max_capacity: 10,
            current_load: 4,
            status: WorkerStatus::Busy,
            metrics: WorkerMetrics::default(),
        }
    }

    #[test]
    fn capacity_helpers() {
        let worker = snapshot();
        assert!(worker.has_capability("gpu"));
        assert!(!worker.has_capability("ml"));
        assert_eq!(worker.remaining_capacity(), 6);
        assert!((worker.load_ratio() - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_capacity_reads_as_fully_loaded() {
        let mut worker = snapshot();
        worker.max_capacity = 0;
        worker.current_load = 0;
        assert_eq!(worker.load_ratio(), 1.0);
        assert_eq!(worker.remaining_capacity(), 0);
    }
}
