use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use coordinator_core::{keys, CoordinationResult, RecordStore, SyncConfig};

use crate::cache::{CacheStats, SyncCache};
use crate::conflict::{self, ConflictStrategy};
use crate::entry::MemoryEntry;
use crate::pattern;
use crate::vector_clock::{CausalOrdering, VectorClock};

/// Callback invoked on every matching local write or externally-observed
/// change. Delivery is best-effort and unordered across keys.
pub type ChangeCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Handle for cancelling a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: u64,
    pattern: String,
    callback: ChangeCallback,
}

/// Result of a batch flush; partial failure is reported, never swallowed.
/// Failed writes stay queued (in order) for the next flush.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    pub flushed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Synchronization statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub reads: u64,
    pub writes: u64,
    pub store_reads: u64,
    pub flushes: u64,
    pub conflicts_resolved: u64,
    pub pending_writes: usize,
    pub cache: CacheStats,
}

#[derive(Debug, Default)]
struct StatsInner {
    reads: u64,
    writes: u64,
    store_reads: u64,
    flushes: u64,
    conflicts_resolved: u64,
}

/// Namespaced, causally-consistent key/value abstraction over the record
/// store, with local caching, write batching and pattern subscriptions.
///
/// One instance per worker process; the cache and batch buffer are private
/// to that process. Cross-worker consistency is eventual, with concurrent
/// writes adjudicated by the conflict resolver on read.
pub struct SyncManager {
    worker_id: String,
    store: Arc<dyn RecordStore>,
    config: SyncConfig,
    strategy: ConflictStrategy,
    cache: SyncCache,
    clock: Mutex<VectorClock>,
    /// Last version observed per key; drives external-change notification
    /// and guards against version regression.
    known_versions: Mutex<HashMap<String, VectorClock>>,
    pending: Mutex<Vec<MemoryEntry>>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscription: AtomicU64,
    stats: Mutex<StatsInner>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    pub fn new(
        worker_id: impl Into<String>,
        store: Arc<dyn RecordStore>,
        config: SyncConfig,
    ) -> Self {
        let strategy = ConflictStrategy::from_name(&config.conflict_strategy).unwrap_or_else(|| {
            warn!(
                "unknown conflict strategy {:?}, falling back to last_write_wins",
                config.conflict_strategy
            );
            ConflictStrategy::LastWriteWins
        });
        Self::with_strategy(worker_id, store, config, strategy)
    }

    /// Build with an explicit strategy, e.g. `ConflictStrategy::Custom`.
    pub fn with_strategy(
        worker_id: impl Into<String>,
        store: Arc<dyn RecordStore>,
        config: SyncConfig,
        strategy: ConflictStrategy,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            cache: SyncCache::new(config.cache_capacity),
            store,
            config,
            strategy,
            clock: Mutex::new(VectorClock::new()),
            known_versions: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            stats: Mutex::new(StatsInner::default()),
            flush_task: Mutex::new(None),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Start the periodic batch flush. Flushes every `flush_interval_ms`
    /// until the shutdown signal fires, then performs one final flush.
    pub async fn start_flush_task(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut flush_interval =
                interval(Duration::from_millis(manager.config.flush_interval_ms));
            loop {
                tokio::select! {
                    _ = flush_interval.tick() => {
                        if let Err(e) = manager.force_sync().await {
                            warn!("periodic flush failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("sync flush task shutting down");
                        if let Err(e) = manager.force_sync().await {
                            warn!("final flush failed: {}", e);
                        }
                        break;
                    }
                }
            }
        });
        *self.flush_task.lock().await = Some(handle);
    }

    /// Read a value, cache-first. Returns `None` for unknown keys, expired
    /// entries and tombstones.
    pub async fn read(&self, key: &str) -> CoordinationResult<Option<Value>> {
        Ok(self.read_entry(key).await?.and_then(|entry| {
            if entry.is_tombstone() || entry.is_expired(Utc::now()) {
                None
            } else {
                Some(entry.value)
            }
        }))
    }

    /// Read a key with any cached copy dropped first, so the result reflects
    /// the latest flushed state. Liveness decisions go through here: a cached
    /// lock entry can outlive its holder's heartbeats by the full cache TTL.
    pub async fn read_fresh(&self, key: &str) -> CoordinationResult<Option<Value>> {
        self.cache.invalidate(key).await;
        self.read(key).await
    }

    /// Read the full versioned entry for a key.
    pub async fn read_entry(&self, key: &str) -> CoordinationResult<Option<MemoryEntry>> {
        self.stats.lock().await.reads += 1;

        // Read-your-writes: the batch buffer overlays the store until flushed.
        let buffered = {
            let pending = self.pending.lock().await;
            pending.iter().rev().find(|e| e.key == key).cloned()
        };
        if let Some(entry) = buffered {
            return Ok(Some(entry));
        }

        if let Some(entry) = self.cache.get(key).await {
            return Ok(Some(entry));
        }

        self.fetch_from_store(key).await
    }

    async fn fetch_from_store(&self, key: &str) -> CoordinationResult<Option<MemoryEntry>> {
        let topic = keys::topic_for(key);
        let records = self.store.list_records(&topic).await?;
        self.stats.lock().await.store_reads += 1;

        let entries: Vec<MemoryEntry> = records
            .iter()
            .filter_map(|text| serde_json::from_str::<MemoryEntry>(text).ok())
            .filter(|entry| entry.key == key)
            .collect();
        if entries.is_empty() {
            return Ok(None);
        }

        let frontier = causal_frontier(entries);
        let latest = if frontier.len() > 1 {
            // Concurrent writers raced on this key; resolve and write back.
            let resolution = match conflict::resolve(&self.strategy, &frontier) {
                Some(resolution) => resolution,
                None => return Ok(None),
            };
            debug!(
                "conflict on {}: {} concurrent versions, {} discarded",
                key,
                frontier.len(),
                resolution.discarded.len()
            );
            self.stats.lock().await.conflicts_resolved += 1;
            counter!("coordinator_sync_conflicts_total").increment(1);

            let resolved = resolution.resolved;
            self.pending.lock().await.push(resolved.clone());
            resolved
        } else {
            match frontier.into_iter().next() {
                Some(entry) => entry,
                None => return Ok(None),
            }
        };

        // Merge the observed version into the local clock so later local
        // writes causally dominate what this worker has seen.
        self.clock.lock().await.merge(&latest.version);

        let changed = {
            let mut known = self.known_versions.lock().await;
            let changed = known.get(key) != Some(&latest.version);
            known.insert(key.to_string(), latest.version.clone());
            changed
        };

        if latest.is_tombstone() || latest.is_expired(Utc::now()) {
            return Ok(None);
        }

        self.cache.put(latest.clone()).await;
        if changed {
            self.notify(key, &latest.value).await;
        }
        Ok(Some(latest))
    }

    /// Current value of every key matching the glob pattern, in key order.
    /// Reads the store directly (plus the unflushed local overlay), never
    /// the cache; the pattern's leading literal segments select the record
    /// topic, so `coordination/assignments/*` scans the coordination log.
    pub async fn read_matching(&self, glob: &str) -> CoordinationResult<Vec<(String, Value)>> {
        let topic = keys::topic_for(glob);
        let records = self.store.list_records(&topic).await?;
        self.stats.lock().await.store_reads += 1;

        let mut by_key: HashMap<String, Vec<MemoryEntry>> = HashMap::new();
        for text in &records {
            if let Ok(entry) = serde_json::from_str::<MemoryEntry>(text) {
                if pattern::matches(glob, &entry.key) {
                    by_key.entry(entry.key.clone()).or_default().push(entry);
                }
            }
        }
        {
            let pending = self.pending.lock().await;
            for entry in pending.iter() {
                if pattern::matches(glob, &entry.key) {
                    by_key.entry(entry.key.clone()).or_default().push(entry.clone());
                }
            }
        }

        let now = Utc::now();
        let mut current: Vec<(String, Value)> = Vec::new();
        for (key, entries) in by_key {
            let frontier = causal_frontier(entries);
            let latest = if frontier.len() > 1 {
                match conflict::resolve(&self.strategy, &frontier) {
                    Some(resolution) => resolution.resolved,
                    None => continue,
                }
            } else {
                match frontier.into_iter().next() {
                    Some(entry) => entry,
                    None => continue,
                }
            };
            if latest.is_tombstone() || latest.is_expired(now) {
                continue;
            }
            current.push((key, latest.value));
        }
        current.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(current)
    }

    /// Write a value: stamps the incremented vector clock and wall-clock
    /// time, invalidates the cache entry, queues the write for batching and
    /// notifies matching subscribers before durability is guaranteed.
    pub async fn write(&self, key: &str, value: Value) -> CoordinationResult<MemoryEntry> {
        self.write_with_ttl(key, value, None).await
    }

    pub async fn write_with_ttl(
        &self,
        key: &str,
        value: Value,
        ttl_ms: Option<u64>,
    ) -> CoordinationResult<MemoryEntry> {
        let version = {
            let mut clock = self.clock.lock().await;
            clock.tick(&self.worker_id);
            clock.clone()
        };

        let mut entry = MemoryEntry::new(key, value, version, &self.worker_id);
        entry.ttl_ms = ttl_ms;

        self.known_versions
            .lock()
            .await
            .insert(key.to_string(), entry.version.clone());
        self.cache.invalidate(key).await;

        let over_threshold = {
            let mut pending = self.pending.lock().await;
            pending.push(entry.clone());
            pending.len() >= self.config.batch_threshold
        };

        self.stats.lock().await.writes += 1;
        counter!("coordinator_sync_writes_total").increment(1);

        // Optimistic delivery, pre-flush.
        self.notify(key, &entry.value).await;

        if over_threshold {
            if let Err(e) = self.force_sync().await {
                // The writes stay queued; the periodic flush retries them.
                warn!("threshold flush failed: {}", e);
            }
        }

        Ok(entry)
    }

    /// Delete a key by writing a tombstone; readers observe absence once the
    /// tombstone's version reaches them.
    pub async fn delete(&self, key: &str) -> CoordinationResult<MemoryEntry> {
        self.write(key, Value::Null).await
    }

    /// Flush the batch buffer immediately. Writes to a key that failed keep
    /// their relative order: later queued writes for that key are requeued
    /// rather than flushed ahead of the failure.
    pub async fn force_sync(&self) -> CoordinationResult<FlushReport> {
        let drained: Vec<MemoryEntry> = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };
        if drained.is_empty() {
            return Ok(FlushReport::default());
        }

        let mut report = FlushReport::default();
        let mut failed_keys: HashSet<String> = HashSet::new();
        let mut requeue: Vec<MemoryEntry> = Vec::new();

        for entry in drained {
            if failed_keys.contains(&entry.key) {
                requeue.push(entry);
                continue;
            }
            let text = match serde_json::to_string(&entry) {
                Ok(text) => text,
                Err(e) => {
                    report.failed.push((entry.key.clone(), e.to_string()));
                    continue;
                }
            };
            let topic = keys::topic_for(&entry.key);
            match self.store.append_record(&topic, &text).await {
                Ok(()) => report.flushed.push(entry.key.clone()),
                Err(e) => {
                    report.failed.push((entry.key.clone(), e.to_string()));
                    failed_keys.insert(entry.key.clone());
                    requeue.push(entry);
                }
            }
        }

        if !requeue.is_empty() {
            let mut pending = self.pending.lock().await;
            let newer = std::mem::take(&mut *pending);
            requeue.extend(newer);
            *pending = requeue;
        }

        self.stats.lock().await.flushes += 1;
        counter!("coordinator_sync_flushes_total").increment(1);
        if !report.is_complete() {
            warn!(
                "partial flush: {} written, {} failed",
                report.flushed.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }

    /// Register a callback for keys matching the glob pattern.
    pub async fn subscribe(&self, pattern: &str, callback: ChangeCallback) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.push(Subscriber {
            id,
            pattern: pattern.to_string(),
            callback,
        });
        SubscriptionId(id)
    }

    pub async fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|s| s.id != subscription.0);
        subscribers.len() != before
    }

    async fn notify(&self, key: &str, value: &Value) {
        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers
            .iter()
            .filter(|s| pattern::matches(&s.pattern, key))
        {
            (subscriber.callback)(key, value);
        }
    }

    pub async fn stats(&self) -> SyncStats {
        let inner = self.stats.lock().await;
        SyncStats {
            reads: inner.reads,
            writes: inner.writes,
            store_reads: inner.store_reads,
            flushes: inner.flushes,
            conflicts_resolved: inner.conflicts_resolved,
            pending_writes: self.pending.lock().await.len(),
            cache: self.cache.stats().await,
        }
    }

    /// Snapshot of the local vector clock; test observability.
    pub async fn clock_snapshot(&self) -> VectorClock {
        self.clock.lock().await.clone()
    }

    /// Stop the flush task and drain the batch buffer.
    pub async fn shutdown(&self) -> CoordinationResult<FlushReport> {
        if let Some(handle) = self.flush_task.lock().await.take() {
            handle.abort();
        }
        self.force_sync().await
    }
}

/// Reduce a set of entries to its causal frontier: every entry not dominated
/// by another. Entries with identical versions collapse to the first seen
/// (records arrive in insertion order, so duplicates carry the same payload).
fn causal_frontier(entries: Vec<MemoryEntry>) -> Vec<MemoryEntry> {
    let mut frontier: Vec<MemoryEntry> = Vec::new();
    for entry in entries {
        let mut dominated = false;
        frontier.retain(|kept| match kept.version.compare(&entry.version) {
            CausalOrdering::Greater | CausalOrdering::Equal => {
                dominated = true;
                true
            }
            CausalOrdering::Less => false,
            CausalOrdering::Concurrent => true,
        });
        if !dominated {
            frontier.push(entry);
        }
    }
    frontier
}
