//! Cadence Jobs - Job Scheduling and Execution Engine
//!
//! Declarative job definitions on top of a durable queue backend:
//! - Schedule compilation from presets or advanced specs (delay, repeat,
//!   retry, priority, concurrency, webhooks)
//! - Fire-time skip rules (business hours, weekends, dates, named conditions)
//! - Lifecycle hooks around every execution, isolated from the job outcome
//! - Namespaced routers merged into one registry with a resolution cache
//! - Worker dispatchers that route deliveries back to registered handlers
//! - Redis and in-memory backends behind one [`QueueBackend`] trait
//!
//! # Architecture
//!
//! ```text
//!  JobsRouter("billing") ─┐
//!  JobsRouter("email")   ─┼─▶ NamespaceRegistry ◀──── ResolutionCache
//!  JobDefinition         ─┘          │
//!                                    ▼
//!  invoke / executor ──▶ Schedule Compiler ──▶ QueueBackend (Redis)
//!                                                   │
//!                                                   ▼
//!                         WorkerDispatcher ──▶ LifecycleRunner
//!                                                   │
//!                         skip rules ─ onStart ─ handler ─ onSuccess/onFailure ─ onComplete
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence_jobs::prelude::*;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Welcome {
//!     to: String,
//! }
//!
//! let engine = JobsEngine::new(Arc::new(RedisBackend::connect(&config.redis).await?), config)?;
//! let email = JobsRouter::new("email").job(
//!     JobDefinition::new("welcome", |input: Welcome, _ctx| async move {
//!         Ok(serde_json::json!({ "sent": input.to }))
//!     })
//!     .queue("emails"),
//! );
//! let jobs = engine.merge(vec![email]).await?;
//!
//! jobs.namespace("email")
//!     .expect("merged")
//!     .schedule("welcome", json!({ "to": "a@example.com" }), AdvancedScheduleSpec::new().delay(5_000))
//!     .await?;
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod definition;
pub mod di;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod lifecycle;
pub mod metrics;
pub mod queue_name;
pub mod registry;
pub mod retry;
pub mod router;
pub mod schedule;
pub mod search;
pub mod skip;

pub use backend::{BackendEvent, InMemoryBackend, JobRecord, JobState, QueueBackend, RedisBackend, WorkerHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{JobsConfig, RedisConfig, ResolutionCacheConfig, WebhookConfig, WorkerConfig};
pub use definition::{JobContext, JobDefinition, JobOptions};
pub use di::JobSchedulerInterface;
pub use dispatcher::{WorkerDispatcher, WorkerSpec};
pub use engine::{InvokeRequest, JobsEngine, JobsEngineBuilder};
pub use error::{JobError, JobResult};
pub use executor::{BulkItem, MergedExecutor, NamespaceExecutor};
pub use hooks::{
    AppContext, CompleteContext, FailureContext, JobExecutionOutcome, JobHookInfo, JobHooks, StartContext,
    SuccessContext,
};
pub use lifecycle::{ExecutionResult, LifecycleRunner, LifecycleState, ReqwestNotifier, WebhookNotifier, WebhookPayload};
pub use metrics::{register_metrics, DispatcherMetrics, JobMetrics};
pub use queue_name::{QueueName, QueueNamer};
pub use registry::{NamespaceRegistry, ResolvedJob};
pub use router::JobsRouter;
pub use schedule::{
    compile, cron_expressions, AdvancedScheduleSpec, CompiledScheduleOptions, RepeatSpec, RetryStrategy,
    ScheduleInput, SchedulePreset, SkipIfRunning,
};
pub use search::{JobSearchResult, SearchFilter, SearchQuery};
pub use skip::{ConditionContext, ConditionRegistry, SkipEvaluator};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{QueueBackend, RedisBackend};
    pub use crate::definition::{JobContext, JobDefinition};
    pub use crate::engine::{InvokeRequest, JobsEngine};
    pub use crate::hooks::JobHooks;
    pub use crate::router::JobsRouter;
    pub use crate::schedule::{AdvancedScheduleSpec, RepeatSpec, SchedulePreset};
    pub use crate::{JobError, JobResult};
    pub use serde_json::json;
    pub use std::sync::Arc;
}
