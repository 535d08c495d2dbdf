//! Redis-backed queue backend.

mod backend;

pub use backend::RedisBackend;

use crate::backend::JobState;
use crate::config::RedisConfig;
use crate::error::{JobError, JobResult};
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

/// Create a Redis connection pool.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!("Creating Redis connection pool for job queues...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for job queues.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Job data key (JSON-encoded record).
    pub fn job(&self, queue: &str, job_id: &str) -> String {
        format!("{}:{}:job:{}", self.prefix, queue, job_id)
    }

    /// Ready jobs (sorted set by priority + time).
    pub fn waiting(&self, queue: &str) -> String {
        format!("{}:{}:wait", self.prefix, queue)
    }

    /// Delayed jobs (sorted set by due time).
    pub fn delayed(&self, queue: &str) -> String {
        format!("{}:{}:delayed", self.prefix, queue)
    }

    /// Per-state listing index (sorted set by creation time).
    pub fn state(&self, queue: &str, state: JobState) -> String {
        format!("{}:{}:state:{}", self.prefix, queue, state.as_str())
    }

    /// Job id sequence.
    pub fn id_sequence(&self, queue: &str) -> String {
        format!("{}:{}:id", self.prefix, queue)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("cadence:jobs")
    }
}

/// Score for the waiting set. Higher priority sorts first, then earlier due.
pub(crate) fn priority_score(priority: i32, due_at_ms: i64) -> f64 {
    -f64::from(priority) * 1_000_000_000_000.0 + due_at_ms as f64
}
