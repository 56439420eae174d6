use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Per-worker logical clock used to order writes causally.
///
/// Each component counts the writes one worker has issued; comparing two
/// clocks yields happened-before, identity, or concurrency.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorClock {
    clocks: HashMap<String, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the component owned by `worker_id`.
    pub fn tick(&mut self, worker_id: &str) {
        *self.clocks.entry(worker_id.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, worker_id: &str) -> u64 {
        self.clocks.get(worker_id).copied().unwrap_or(0)
    }

    /// Merge another clock into this one, keeping the maximum per component.
    pub fn merge(&mut self, other: &Self) {
        for (worker, &count) in &other.clocks {
            let entry = self.clocks.entry(worker.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
    }

    /// Causal relationship of `self` to `other`.
    pub fn compare(&self, other: &Self) -> CausalOrdering {
        let mut less = false;
        let mut greater = false;
        let workers: HashSet<&String> = self.clocks.keys().chain(other.clocks.keys()).collect();

        for worker in workers {
            let left = self.clocks.get(worker).copied().unwrap_or(0);
            let right = other.clocks.get(worker).copied().unwrap_or(0);
            if left < right {
                less = true;
            } else if left > right {
                greater = true;
            }
        }

        match (less, greater) {
            (false, false) => CausalOrdering::Equal,
            (true, false) => CausalOrdering::Less,
            (false, true) => CausalOrdering::Greater,
            (true, true) => CausalOrdering::Concurrent,
        }
    }

    /// Whether neither clock dominates the other.
    pub fn concurrent_with(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrdering::Concurrent
    }
}

/// Relationship between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrdering {
    /// `self` happened-before `other`.
    Less,
    Equal,
    /// `self` happened-after `other`.
    Greater,
    /// Neither dominates; the writes raced.
    Concurrent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_ticks_are_strictly_increasing() {
        let mut clock = VectorClock::new();
        for expected in 1..=10 {
            clock.tick("worker-a");
            assert_eq!(clock.get("worker-a"), expected);
        }
    }

    #[test]
    fn successor_dominates_predecessor() {
        let mut earlier = VectorClock::new();
        earlier.tick("worker-a");

        let mut later = earlier.clone();
        later.tick("worker-a");

        assert_eq!(later.compare(&earlier), CausalOrdering::Greater);
        assert_eq!(earlier.compare(&later), CausalOrdering::Less);
        assert_eq!(earlier.compare(&earlier.clone()), CausalOrdering::Equal);
    }

    #[test]
    fn independent_ticks_are_concurrent() {
        let mut clock_a = VectorClock::new();
        let mut clock_b = VectorClock::new();
        clock_a.tick("worker-a");
        clock_b.tick("worker-b");

        assert!(clock_a.concurrent_with(&clock_b));
        assert!(clock_b.concurrent_with(&clock_a));
    }

    #[test]
    fn mixed_dominance_reads_as_concurrent() {
        // {w1:5, w2:3} vs {w1:4, w2:4}: neither dominates.
        let mut a = VectorClock::new();
        let mut b = VectorClock::new();
        for _ in 0..5 {
            a.tick("w1");
        }
        for _ in 0..3 {
            a.tick("w2");
        }
        for _ in 0..4 {
            b.tick("w1");
        }
        for _ in 0..4 {
            b.tick("w2");
        }
        assert_eq!(a.compare(&b), CausalOrdering::Concurrent);
    }

    #[test]
    fn merge_takes_componentwise_maximum() {
        let mut a = VectorClock::new();
        let mut b = VectorClock::new();
        a.tick("w1");
        a.tick("w1");
        b.tick("w1");
        b.tick("w2");

        a.merge(&b);
        assert_eq!(a.get("w1"), 2);
        assert_eq!(a.get("w2"), 1);
        assert_eq!(a.compare(&b), CausalOrdering::Greater);
    }
}
