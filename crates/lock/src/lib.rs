pub mod heartbeat;
pub mod lock_manager;
pub mod registry;

pub use heartbeat::HeartbeatMonitor;
pub use lock_manager::{LockManager, LockMetrics};
