pub mod cache;
pub mod conflict;
pub mod entry;
pub mod manager;
pub mod pattern;
pub mod vector_clock;

pub use cache::{CacheStats, SyncCache};
pub use conflict::{resolve, ConflictStrategy, CustomResolver};
pub use entry::{ConflictResolution, MemoryEntry};
pub use manager::{ChangeCallback, FlushReport, SubscriptionId, SyncManager, SyncStats};
pub use vector_clock::{CausalOrdering, VectorClock};
