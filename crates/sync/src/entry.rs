use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::vector_clock::VectorClock;

/// One versioned record in the synchronized key/value space.
///
/// The vector clock orders entries causally; the wall-clock timestamp is the
/// last-write-wins fallback when clocks are concurrent. TTL expiry is
/// advisory and enforced by readers, never by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Value,
    pub version: VectorClock,
    /// Worker id of the last writer.
    pub writer: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl MemoryEntry {
    pub fn new(
        key: impl Into<String>,
        value: Value,
        version: VectorClock,
        writer: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            version,
            writer: writer.into(),
            timestamp: Utc::now(),
            ttl_ms: None,
        }
    }

    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_ms {
            Some(ttl) => (now - self.timestamp).num_milliseconds() > ttl as i64,
            None => false,
        }
    }

    /// Deletions are written as null-valued entries so their version still
    /// propagates; readers treat them as absence.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_null()
    }
}

/// Outcome of reconciling causally-concurrent entries for one key.
///
/// Discarded entries are kept for audit and metrics only, never reapplied.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    pub resolved: MemoryEntry,
    pub strategy: String,
    pub discarded: Vec<MemoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ttl_expiry_is_reader_enforced() {
        let mut entry = MemoryEntry::new(
            "workers/w1/heartbeat",
            serde_json::json!({"at": "now"}),
            VectorClock::new(),
            "w1",
        )
        .with_ttl(1_000);

        let now = entry.timestamp + Duration::milliseconds(500);
        assert!(!entry.is_expired(now));
        let later = entry.timestamp + Duration::milliseconds(1_500);
        assert!(entry.is_expired(later));

        entry.ttl_ms = None;
        assert!(!entry.is_expired(later));
    }

    #[test]
    fn entry_round_trips_with_version() {
        let mut version = VectorClock::new();
        version.tick("w1");
        let entry = MemoryEntry::new("tasks/1/state", serde_json::json!({"s": 1}), version, "w1");

        let text = serde_json::to_string(&entry).unwrap();
        let parsed: MemoryEntry = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, entry);
        assert!(!parsed.is_tombstone());
    }
}
