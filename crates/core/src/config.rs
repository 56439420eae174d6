use serde::{Deserialize, Serialize};

use crate::{CoordinationError, CoordinationResult};

/// Lock acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Heartbeat age after which a held lock is reported as `Stale`.
    /// Forcible reclamation is governed by `HeartbeatConfig.stale_threshold_ms`.
    pub lock_timeout_ms: u64,
    /// First retry delay under the `Retry` strategy.
    pub backoff_base_ms: u64,
    /// Cap applied to the exponential retry delay.
    pub backoff_max_ms: u64,
    /// Random jitter applied to each retry delay (0.0-1.0).
    pub backoff_jitter: f64,
    /// Maximum acquisition attempts under the `Retry` strategy.
    pub max_retries: u32,
    /// Attempts against a store that reports transient failures.
    pub store_retry_limit: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 300_000, // 5 minutes
            backoff_base_ms: 1_000,   // 1s, 2s, 4s, 8s, 16s
            backoff_max_ms: 16_000,
            backoff_jitter: 0.1,
            max_retries: 5,
            store_retry_limit: 3,
        }
    }
}

impl LockConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backoff_base_ms == 0 {
            return Err(anyhow::anyhow!("backoff base must be greater than 0"));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(anyhow::anyhow!(
                "backoff cap {} is below the base delay {}",
                self.backoff_max_ms,
                self.backoff_base_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(anyhow::anyhow!("backoff jitter must be within 0.0-1.0"));
        }
        if self.max_retries == 0 {
            return Err(anyhow::anyhow!("max retries must be greater than 0"));
        }
        if self.lock_timeout_ms == 0 {
            return Err(anyhow::anyhow!("lock timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// Heartbeat emission and staleness detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between liveness writes for each held lock.
    pub interval_ms: u64,
    /// Delay before the single retry of a failed heartbeat write.
    pub retry_backoff_ms: u64,
    /// Heartbeat age beyond which another worker may recover the lock.
    pub stale_threshold_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,         // 30 seconds
            retry_backoff_ms: 1_000,     // one short retry
            stale_threshold_ms: 300_000, // 5 minutes
        }
    }
}

impl HeartbeatConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_ms == 0 {
            return Err(anyhow::anyhow!("heartbeat interval must be greater than 0"));
        }
        if self.stale_threshold_ms <= self.interval_ms {
            return Err(anyhow::anyhow!(
                "stale threshold {}ms must exceed the heartbeat interval {}ms",
                self.stale_threshold_ms,
                self.interval_ms
            ));
        }
        Ok(())
    }
}

/// Memory synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval of the background batch flush.
    pub flush_interval_ms: u64,
    /// Pending-write count that triggers an immediate flush.
    pub batch_threshold: usize,
    /// Maximum number of cached entries.
    pub cache_capacity: usize,
    /// Conflict resolution strategy name: "last_write_wins", "array_union",
    /// "deep_merge" or "numeric_max".
    pub conflict_strategy: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 100,
            batch_threshold: 50,
            cache_capacity: 1_000,
            conflict_strategy: "last_write_wins".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.flush_interval_ms == 0 {
            return Err(anyhow::anyhow!("flush interval must be greater than 0"));
        }
        if self.batch_threshold == 0 {
            return Err(anyhow::anyhow!("batch threshold must be greater than 0"));
        }
        if self.cache_capacity == 0 {
            return Err(anyhow::anyhow!("cache capacity must be greater than 0"));
        }
        let valid = ["last_write_wins", "array_union", "deep_merge", "numeric_max"];
        if !valid.contains(&self.conflict_strategy.as_str()) {
            return Err(anyhow::anyhow!(
                "unknown conflict strategy: {}, supported: {:?}",
                self.conflict_strategy,
                valid
            ));
        }
        Ok(())
    }
}

/// Load balancing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Active strategy: "round_robin", "least_loaded", "capability_based",
    /// "performance_based" or "adaptive".
    pub strategy: String,
    /// Load ratio above which a worker counts as overloaded.
    pub overload_threshold: f64,
    /// Outcomes kept per (worker, task type) pair.
    pub history_window: usize,
    /// Step size of the adaptive weight update.
    pub learning_rate: f64,
    /// Outcomes required before learned weights replace the defaults.
    pub min_samples: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: "least_loaded".to_string(),
            overload_threshold: 0.8,
            history_window: 50,
            learning_rate: 0.1,
            min_samples: 5,
        }
    }
}

impl BalancerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid = [
            "round_robin",
            "least_loaded",
            "capability_based",
            "performance_based",
            "adaptive",
        ];
        if !valid.contains(&self.strategy.as_str()) {
            return Err(anyhow::anyhow!(
                "unknown balancing strategy: {}, supported: {:?}",
                self.strategy,
                valid
            ));
        }
        if !(0.0..=1.0).contains(&self.overload_threshold) {
            return Err(anyhow::anyhow!("overload threshold must be within 0.0-1.0"));
        }
        if self.history_window == 0 {
            return Err(anyhow::anyhow!("history window must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.learning_rate) {
            return Err(anyhow::anyhow!("learning rate must be within 0.0-1.0"));
        }
        Ok(())
    }
}

/// Top-level configuration for one worker process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Stable worker identifier; generated when absent.
    pub worker_id: Option<String>,
    pub lock: LockConfig,
    pub heartbeat: HeartbeatConfig,
    pub sync: SyncConfig,
    pub balancer: BalancerConfig,
}

impl CoordinationConfig {
    /// Load configuration from an optional TOML file with `COORDINATOR__*`
    /// environment overrides, e.g. `COORDINATOR__LOCK__MAX_RETRIES=3`.
    pub fn load(path: Option<&str>) -> CoordinationResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("COORDINATOR").separator("__"))
            .build()
            .map_err(|e| CoordinationError::Configuration(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| CoordinationError::Configuration(e.to_string()))?;
        config
            .validate()
            .map_err(|e| CoordinationError::Configuration(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.lock.validate()?;
        self.heartbeat.validate()?;
        self.sync.validate()?;
        self.balancer.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CoordinationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock.max_retries, 5);
        assert_eq!(config.lock.backoff_base_ms, 1_000);
        assert_eq!(config.lock.backoff_max_ms, 16_000);
        assert_eq!(config.heartbeat.interval_ms, 30_000);
        assert_eq!(config.heartbeat.stale_threshold_ms, 300_000);
        assert_eq!(config.sync.flush_interval_ms, 100);
        assert_eq!(config.balancer.overload_threshold, 0.8);
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let config = LockConfig {
            backoff_base_ms: 5_000,
            backoff_max_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_strategy_names() {
        let sync = SyncConfig {
            conflict_strategy: "newest".to_string(),
            ..Default::default()
        };
        assert!(sync.validate().is_err());

        let balancer = BalancerConfig {
            strategy: "random".to_string(),
            ..Default::default()
        };
        assert!(balancer.validate().is_err());
    }

    #[test]
    fn rejects_stale_threshold_below_interval() {
        let config = HeartbeatConfig {
            interval_ms: 30_000,
            stale_threshold_ms: 10_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_without_file_yields_defaults() {
        let config = CoordinationConfig::load(None).unwrap();
        assert_eq!(config.lock.max_retries, 5);
        assert!(config.worker_id.is_none());
    }
}
