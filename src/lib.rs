//! Distributed task coordination over an external record store.
//!
//! Four cooperating components, one instance of each per worker process:
//! a lock manager (exclusive task ownership through the store's atomic
//! assignment primitive), a heartbeat monitor (liveness and stale-lock
//! recovery), a synchronized memory layer (eventually-consistent key/value
//! state with vector-clock conflict resolution) and a load balancer
//! (pluggable worker-selection strategies). [`CoordinationContext`] wires
//! them together.

pub mod context;
pub mod shutdown;

pub use context::{CoordinationContext, CoordinationMetrics};
pub use shutdown::ShutdownManager;

pub use coordinator_balancer::{
    BalancingContext, LoadBalancer, MigrationSuggestion, ScoreWeights, SelectionStrategy,
    StrategyRegistry, WorkerScore,
};
pub use coordinator_core::{
    keys, init_logging, BalancerConfig, CoordinationConfig, CoordinationError,
    CoordinationResult, HeartbeatConfig, LockConfig, LockOutcome, LockStatus, LockStrategy,
    QueuedTask, RecordStore, RejectReason, SyncConfig, TaskInfo, TaskLock, TaskRequirements,
    WorkerMetrics, WorkerSnapshot, WorkerStatus,
};
pub use coordinator_lock::{HeartbeatMonitor, LockManager, LockMetrics};
pub use coordinator_store::InMemoryRecordStore;
pub use coordinator_sync::{
    CausalOrdering, ConflictResolution, ConflictStrategy, FlushReport, MemoryEntry, SyncManager,
    SyncStats, VectorClock,
};
