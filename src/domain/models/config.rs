//! Engine configuration model.
//!
//! Loaded once at startup (figment: defaults → YAML → env); the engine
//! does not reload live.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the achievement engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub engine: TriggerEngineConfig,
    pub events: EventRetentionConfig,
    pub notifications: NotificationConfig,
    pub observability: ObservabilityConfig,
}

/// Database pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite path or URL (`sqlite:…`); `sqlite::memory:` for tests.
    pub url: String,
    pub pool_size: u32,
    pub pool_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/accolade.db".to_string(),
            pool_size: 5,
            pool_timeout_secs: 3,
        }
    }
}

impl DatabaseConfig {
    pub fn pool_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout_secs)
    }
}

/// Cache TTL and capacity bounds. Applied per cache type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_seconds: u64,
    pub max_entries_per_type: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
            max_entries_per_type: 1000,
        }
    }
}

/// What to do when the trigger engine's input queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Producer awaits until the queue has room.
    Block,
    /// Producer gets `EngineError::Busy` immediately.
    Reject,
}

/// Trigger engine worker/queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerEngineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Replay batch size (max unprocessed events fetched per tick).
    pub batch_size: u32,
    pub replay_interval_seconds: u64,
    pub backpressure: BackpressurePolicy,
    /// Grace period for draining in-flight events on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TriggerEngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            batch_size: 100,
            replay_interval_seconds: 30,
            backpressure: BackpressurePolicy::Block,
            shutdown_grace_secs: 10,
        }
    }
}

/// Event-log retention: archival and deletion horizons.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventRetentionConfig {
    pub archive_after_days: u32,
    pub delete_after_days: u32,
    /// Batch size for the cleanup delete loop.
    pub batch_size: u32,
    /// How often the maintenance loop runs.
    pub maintenance_interval_secs: u64,
}

impl Default for EventRetentionConfig {
    fn default() -> Self {
        Self {
            archive_after_days: 30,
            delete_after_days: 90,
            batch_size: 1000,
            maintenance_interval_secs: 3600,
        }
    }
}

/// Over-limit behavior for rate-limited notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPolicy {
    /// Wait until the limiter admits the key, then send.
    Defer,
    /// Skip the delivery and record the decision.
    Drop,
}

/// Notification retry and rate-limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub retry_max: u32,
    pub retry_backoff_base_seconds: u64,
    pub rate_limit_policy: RateLimitPolicy,
    /// Minimum gap between DMs to the same user.
    pub dm_rate_limit_seconds: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            retry_max: 3,
            retry_backoff_base_seconds: 2,
            rate_limit_policy: RateLimitPolicy::Drop,
            dm_rate_limit_seconds: 10,
        }
    }
}

/// Performance monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// Where the JSON performance baseline is stored.
    pub baseline_path: String,
    /// A metric this many times worse than baseline is a regression.
    pub regression_factor: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            baseline_path: "data/perf_baseline.json".to_string(),
            regression_factor: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.database.pool_size >= 1);
        assert!(config.engine.workers >= 1);
        assert!(config.engine.queue_capacity > 0);
        assert_eq!(config.engine.backpressure, BackpressurePolicy::Block);
        assert_eq!(config.notifications.rate_limit_policy, RateLimitPolicy::Drop);
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = EngineConfig::default();
        let raw = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.cache.default_ttl_seconds, config.cache.default_ttl_seconds);
    }
}
