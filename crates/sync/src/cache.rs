use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::entry::MemoryEntry;
use crate::pattern;

/// Bounded local cache fronting the record store.
///
/// Private to one worker process. Eviction is least-recently-used; expired
/// entries (per the advisory TTL) are dropped on access.
pub struct SyncCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

struct CacheInner {
    entries: HashMap<String, CachedEntry>,
    stats: CacheStats,
    tick: u64,
}

struct CachedEntry {
    entry: MemoryEntry,
    last_access: u64,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl SyncCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
                tick: 0,
            }),
            capacity,
        }
    }

    pub async fn get(&self, key: &str) -> Option<MemoryEntry> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;

        match inner.entries.get_mut(key) {
            Some(cached) if !cached.entry.is_expired(Utc::now()) => {
                cached.last_access = tick;
                inner.stats.hits += 1;
                Some(cached.entry.clone())
            }
            Some(_) => {
                debug!("cache entry expired: {}", key);
                inner.entries.remove(key);
                inner.stats.misses += 1;
                None
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    pub async fn put(&self, entry: MemoryEntry) {
        let mut inner = self.inner.lock().await;
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(
            entry.key.clone(),
            CachedEntry {
                entry,
                last_access: tick,
            },
        );

        while inner.entries.len() > self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, cached)| cached.last_access)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    inner.entries.remove(&key);
                    inner.stats.evictions += 1;
                }
                None => break,
            }
        }
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.stats.invalidations += 1;
        }
        removed
    }

    /// Drop every cached entry whose key matches the glob pattern.
    pub async fn invalidate_pattern(&self, glob: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let matching: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| pattern::matches(glob, key))
            .cloned()
            .collect();
        for key in &matching {
            inner.entries.remove(key);
        }
        inner.stats.invalidations += matching.len() as u64;
        matching.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats.clone()
    }
}
