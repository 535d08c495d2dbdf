//! Lifecycle hooks attached to a job definition.
//!
//! Hooks observe one phase of an execution. Their errors are contained by
//! the lifecycle runner and never change the job's outcome.

use crate::error::JobResult;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Application context handed to handlers and hooks.
pub type AppContext = Arc<dyn Any + Send + Sync>;

/// Builds the application context for one execution.
pub type ContextFactory = Arc<dyn Fn() -> Result<AppContext, String> + Send + Sync>;

/// Context used when no factory is configured.
pub fn empty_context() -> AppContext {
    Arc::new(())
}

/// Per-execution snapshot of the job being run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHookInfo {
    pub id: String,
    pub name: String,
    pub attempts_made: u32,
    pub created_at: DateTime<Utc>,
    pub namespace: Option<String>,
    pub queue_name: String,
    pub started_at: DateTime<Utc>,
    /// Set once the handler has settled.
    pub execution_time: Option<Duration>,
}

/// Passed to `on_start`.
#[derive(Clone)]
pub struct StartContext {
    pub input: Value,
    pub context: AppContext,
    pub job: JobHookInfo,
    pub started_at: DateTime<Utc>,
}

/// Passed to `on_success`.
#[derive(Clone)]
pub struct SuccessContext {
    pub input: Value,
    pub context: AppContext,
    pub job: JobHookInfo,
    pub result: Value,
    pub completed_at: DateTime<Utc>,
    pub execution_time: Duration,
}

/// Passed to `on_failure`.
#[derive(Clone)]
pub struct FailureContext {
    pub input: Value,
    pub context: AppContext,
    pub job: JobHookInfo,
    /// Display form of the handler error.
    pub error: String,
    pub error_code: &'static str,
    pub failed_at: DateTime<Utc>,
    pub execution_time: Duration,
    pub is_final_attempt: bool,
}

/// Passed to `on_complete`, after every execution including skipped ones.
#[derive(Clone)]
pub struct CompleteContext {
    pub input: Value,
    pub context: AppContext,
    pub job: JobHookInfo,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub execution_time: Duration,
}

pub type StartHook = Arc<dyn Fn(StartContext) -> BoxFuture<'static, JobResult<()>> + Send + Sync>;
pub type SuccessHook = Arc<dyn Fn(SuccessContext) -> BoxFuture<'static, JobResult<()>> + Send + Sync>;
pub type FailureHook = Arc<dyn Fn(FailureContext) -> BoxFuture<'static, JobResult<()>> + Send + Sync>;
pub type CompleteHook = Arc<dyn Fn(CompleteContext) -> BoxFuture<'static, JobResult<()>> + Send + Sync>;

/// Optional hooks for the four lifecycle phases.
#[derive(Clone, Default)]
pub struct JobHooks {
    pub on_start: Option<StartHook>,
    pub on_success: Option<SuccessHook>,
    pub on_failure: Option<FailureHook>,
    pub on_complete: Option<CompleteHook>,
}

impl std::fmt::Debug for JobHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl JobHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(StartContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<()>> + Send + 'static,
    {
        self.on_start = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    pub fn on_success<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(SuccessContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<()>> + Send + 'static,
    {
        self.on_success = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    pub fn on_failure<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(FailureContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<()>> + Send + 'static,
    {
        self.on_failure = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    pub fn on_complete<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CompleteContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<()>> + Send + 'static,
    {
        self.on_complete = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    /// Returns true if no hook is set.
    pub fn is_empty(&self) -> bool {
        self.on_start.is_none() && self.on_success.is_none() && self.on_failure.is_none() && self.on_complete.is_none()
    }
}

/// Terminal record of one execution, handed to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct JobExecutionOutcome {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time: Duration,
    pub is_final_attempt: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_hooks() {
        let hooks = JobHooks::new()
            .on_start(|_ctx| async { Ok(()) })
            .on_complete(|_ctx| async { Ok(()) });
        assert!(hooks.on_start.is_some());
        assert!(hooks.on_success.is_none());
        assert!(hooks.on_failure.is_none());
        assert!(hooks.on_complete.is_some());
        assert!(!hooks.is_empty());
        assert!(JobHooks::default().is_empty());
    }

    #[test]
    fn test_empty_context_downcasts_to_unit() {
        let ctx = empty_context();
        assert!(ctx.downcast_ref::<()>().is_some());
    }
}
