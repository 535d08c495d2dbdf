//! Job engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the job engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Global queue prefix (tenant). Empty means no prefix.
    #[serde(default)]
    pub queue_prefix: Option<String>,

    /// Attempts used when a job does not set its own.
    #[serde(default = "default_attempts")]
    pub default_attempts: u32,

    /// Path resolution cache.
    #[serde(default)]
    pub resolution_cache: ResolutionCacheConfig,

    /// Worker dispatcher configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Webhook notification configuration.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Redis backend configuration.
    #[serde(default)]
    pub redis: RedisConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            queue_prefix: None,
            default_attempts: default_attempts(),
            resolution_cache: ResolutionCacheConfig::default(),
            worker: WorkerConfig::default(),
            webhook: WebhookConfig::default(),
            redis: RedisConfig::default(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}

impl JobsConfig {
    /// Validate value ranges.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_attempts == 0 {
            return Err("jobs.default_attempts must be at least 1".to_string());
        }
        if self.resolution_cache.capacity == 0 {
            return Err("jobs.resolution_cache.capacity must be at least 1".to_string());
        }
        if self.worker.concurrency == 0 {
            return Err("jobs.worker.concurrency must be at least 1".to_string());
        }
        if self.redis.pool_size == 0 {
            return Err("jobs.redis.pool_size must be at least 1".to_string());
        }
        if let Some(prefix) = self.queue_prefix.as_deref() {
            crate::queue_name::QueueNamer::new(Some(prefix.to_string())).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// Resolution cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionCacheConfig {
    /// Maximum cached paths.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entry lifetime in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for ResolutionCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_ttl() -> u64 {
    300 // 5 minutes
}

impl ResolutionCacheConfig {
    /// Returns the TTL as Duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Worker dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent executions per dispatcher.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Start one dispatcher per queue when routers are merged.
    #[serde(default)]
    pub auto_start: bool,

    /// Attach logging observers to auto-started dispatchers.
    #[serde(default)]
    pub debug: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            auto_start: false,
            debug: false,
        }
    }
}

fn default_concurrency() -> usize {
    // Use available parallelism or fallback to 4
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
        .max(4)
}

/// Webhook notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_webhook_timeout(),
        }
    }
}

fn default_webhook_timeout() -> u64 {
    10
}

impl WebhookConfig {
    /// Returns the request timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Key prefix for all job-related keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Worker polling interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_key_prefix() -> String {
    "cadence:jobs".to_string()
}

fn default_poll_interval() -> u64 {
    100 // 100ms
}

impl RedisConfig {
    /// Returns poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JobsConfig::default();
        assert_eq!(config.resolution_cache.capacity, 1000);
        assert_eq!(config.resolution_cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.redis.key_prefix, "cadence:jobs");
        assert!(config.worker.concurrency >= 4);
        assert!(!config.worker.auto_start);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: JobsConfig =
            serde_json::from_str(r#"{"queue_prefix":"acme","worker":{"auto_start":true}}"#).unwrap();
        assert_eq!(config.queue_prefix.as_deref(), Some("acme"));
        assert!(config.worker.auto_start);
        assert_eq!(config.default_attempts, 3);
        assert_eq!(config.webhook.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate() {
        assert!(JobsConfig::default().validate().is_ok());

        let mut config = JobsConfig::default();
        config.resolution_cache.capacity = 0;
        assert!(config.validate().is_err());

        let config = JobsConfig {
            queue_prefix: Some("bad:prefix".into()),
            ..JobsConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
