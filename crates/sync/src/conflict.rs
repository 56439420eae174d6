use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::entry::{ConflictResolution, MemoryEntry};
use crate::vector_clock::VectorClock;

/// Caller-supplied resolver; must be pure over its input set.
pub type CustomResolver = Arc<dyn Fn(&[MemoryEntry]) -> Value + Send + Sync>;

/// How causally-concurrent writes to one key are reconciled.
#[derive(Clone)]
pub enum ConflictStrategy {
    /// Keep the entry with the latest wall-clock timestamp (default).
    LastWriteWins,
    /// Union of array values, preserving first-seen order.
    ArrayUnion,
    /// Recursive object merge, newer entries overriding older ones.
    DeepMerge,
    /// Maximum of numeric values.
    NumericMax,
    Custom(CustomResolver),
}

impl ConflictStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ConflictStrategy::LastWriteWins => "last_write_wins",
            ConflictStrategy::ArrayUnion => "array_union",
            ConflictStrategy::DeepMerge => "deep_merge",
            ConflictStrategy::NumericMax => "numeric_max",
            ConflictStrategy::Custom(_) => "custom",
        }
    }

    /// Parse a configured strategy name; `Custom` is only built in code.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "last_write_wins" => Some(ConflictStrategy::LastWriteWins),
            "array_union" => Some(ConflictStrategy::ArrayUnion),
            "deep_merge" => Some(ConflictStrategy::DeepMerge),
            "numeric_max" => Some(ConflictStrategy::NumericMax),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reconcile a set of concurrent entries for the same key.
///
/// Inputs are never mutated; the result is deterministic for any input
/// permutation. Entries are first sorted ascending by (timestamp, writer)
/// so ties always break the same way.
pub fn resolve(strategy: &ConflictStrategy, entries: &[MemoryEntry]) -> Option<ConflictResolution> {
    if entries.is_empty() {
        return None;
    }

    let mut ordered: Vec<MemoryEntry> = entries.to_vec();
    ordered.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.writer.cmp(&b.writer))
    });

    // The newest entry anchors the resolved metadata; its version is the
    // merge of every participant so the winner dominates all of them.
    let base = ordered.last().cloned()?;
    let mut version = VectorClock::new();
    for entry in &ordered {
        version.merge(&entry.version);
    }

    let value = match strategy {
        ConflictStrategy::LastWriteWins => base.value.clone(),
        ConflictStrategy::ArrayUnion => union_arrays(&ordered),
        ConflictStrategy::DeepMerge => deep_merge(&ordered),
        ConflictStrategy::NumericMax => numeric_max(&ordered, &base),
        ConflictStrategy::Custom(resolver) => resolver(&ordered),
    };

    let discarded: Vec<MemoryEntry> = ordered[..ordered.len() - 1].to_vec();
    debug!(
        "resolved {} concurrent entries for {} via {}",
        entries.len(),
        base.key,
        strategy.name()
    );

    Some(ConflictResolution {
        resolved: MemoryEntry {
            value,
            version,
            ..base
        },
        strategy: strategy.name().to_string(),
        discarded,
    })
}

fn union_arrays(ordered: &[MemoryEntry]) -> Value {
    let mut merged: Vec<Value> = Vec::new();
    for entry in ordered {
        if let Value::Array(items) = &entry.value {
            for item in items {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
        }
    }
    Value::Array(merged)
}

fn deep_merge(ordered: &[MemoryEntry]) -> Value {
    let mut merged = Value::Object(Map::new());
    for entry in ordered {
        merge_into(&mut merged, &entry.value);
    }
    merged
}

fn merge_into(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, incoming) => *target = incoming.clone(),
    }
}

fn numeric_max(ordered: &[MemoryEntry], base: &MemoryEntry) -> Value {
    ordered
        .iter()
        .filter_map(|entry| entry.value.as_f64().map(|n| (n, &entry.value)))
        .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, value)| value.clone())
        .unwrap_or_else(|| base.value.clone())
}
