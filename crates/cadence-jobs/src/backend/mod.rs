//! Durable queue backend contract.
//!
//! The engine compiles options and runs lifecycles; storage, delivery,
//! retry timing and repeat timers belong to a [`QueueBackend`].

pub mod memory;
pub mod redis;
pub mod repeat;

use crate::error::JobResult;
use crate::queue_name::QueueName;
use crate::retry::delay_for_attempt;
use crate::schedule::CompiledScheduleOptions;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

pub use memory::InMemoryBackend;
pub use self::redis::RedisBackend;

/// Backend-side job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready for delivery.
    Waiting,
    /// Waiting for its delay to elapse.
    Delayed,
    /// Delivered to a processor.
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Delayed,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job as stored by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub queue: String,
    pub payload: Value,
    pub options: CompiledScheduleOptions,
    pub state: JobState,
    /// Attempts already made before the current delivery.
    pub attempts_made: u32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Earliest instant the job may be delivered.
    pub run_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    /// Repetitions already scheduled from this record's repeat chain.
    #[serde(default)]
    pub repeat_count: u32,
}

impl JobRecord {
    /// Fresh record as produced by an enqueue at `now`.
    pub fn new(
        id: impl Into<String>,
        queue: impl AsRef<str>,
        name: &str,
        payload: Value,
        options: CompiledScheduleOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let delay = options.delay.unwrap_or(0);
        let run_at = now + chrono::Duration::milliseconds(i64::try_from(delay).unwrap_or(i64::MAX / 2));
        let state = if delay > 0 { JobState::Delayed } else { JobState::Waiting };
        Self {
            id: id.into(),
            name: name.to_string(),
            queue: queue.as_ref().to_string(),
            payload,
            priority: options.priority.unwrap_or(0),
            options,
            state,
            attempts_made: 0,
            created_at: now,
            run_at,
            processed_at: None,
            finished_at: None,
            failed_reason: None,
            return_value: None,
            repeat_count: 0,
        }
    }

    /// Returns true if no attempts remain after the current one failed.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts_made >= self.options.attempts_or_default()
    }
}

/// Lifecycle events emitted by a bound processor.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    Active(JobRecord),
    Completed(JobRecord),
    Failed { job: JobRecord, error: String },
    /// The queue has no more waiting jobs.
    Drained,
}

/// Processor invoked by the backend for each delivery.
///
/// The returned value becomes the job's return value; an error marks the
/// delivery as failed and lets the backend apply its retry policy.
pub type ProcessorFn = Arc<dyn Fn(JobRecord) -> BoxFuture<'static, JobResult<Value>> + Send + Sync>;

/// Options for a bound processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub concurrency: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Handle to a processor bound on one queue.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    /// Queue this processor is bound to.
    fn queue(&self) -> &QueueName;

    /// Subscribe to lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<BackendEvent>;

    /// Stop delivering jobs and release resources.
    async fn close(&self) -> JobResult<()>;
}

/// Minimum contract consumed from a durable queue backend.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store a job and return its id. An explicit `options.job_id` that
    /// already exists returns the existing id without adding a job.
    async fn enqueue(
        &self,
        queue: &QueueName,
        job_name: &str,
        payload: Value,
        options: &CompiledScheduleOptions,
    ) -> JobResult<String>;

    /// Page through jobs in the given states.
    async fn get_jobs(
        &self,
        queue: &QueueName,
        states: &[JobState],
        offset: usize,
        limit: usize,
    ) -> JobResult<Vec<JobRecord>>;

    /// Bind a processor to a queue.
    async fn bind_processor(
        &self,
        queue: &QueueName,
        processor: ProcessorFn,
        options: WorkerOptions,
    ) -> JobResult<Arc<dyn WorkerHandle>>;

    /// Release the producer-side handle for one queue.
    async fn close_queue(&self, queue: &QueueName) -> JobResult<()>;

    /// Release every backend resource.
    async fn close(&self) -> JobResult<()>;
}

/// Capacity of the per-worker event channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Apply a processor result to the delivered record and return the event
/// to publish. Failed retryable deliveries are re-delayed by the backoff.
pub(crate) fn settle(record: &mut JobRecord, result: JobResult<Value>, now: DateTime<Utc>) -> BackendEvent {
    match result {
        Ok(value) => {
            record.state = JobState::Completed;
            record.finished_at = Some(now);
            record.return_value = Some(value);
            BackendEvent::Completed(record.clone())
        }
        Err(err) => {
            record.attempts_made += 1;
            record.failed_reason = Some(err.to_string());
            if record.attempts_exhausted() || !err.is_retryable() {
                record.state = JobState::Failed;
                record.finished_at = Some(now);
            } else {
                let delay = delay_for_attempt(record.options.backoff.as_ref(), record.attempts_made);
                record.state = JobState::Delayed;
                record.run_at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            }
            BackendEvent::Failed {
                job: record.clone(),
                error: err.to_string(),
            }
        }
    }
}

/// Returns true if a settled record should be dropped from storage.
pub(crate) fn should_remove(record: &JobRecord) -> bool {
    match record.state {
        JobState::Completed => record.options.remove_on_complete,
        JobState::Failed => record.options.remove_on_fail,
        _ => false,
    }
}
