//! Job definitions.

use crate::error::{JobError, JobResult};
use crate::hooks::{AppContext, JobHookInfo, JobHooks};
use crate::schedule::ScheduleInput;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

/// Type-erased job handler.
pub type JobHandler = Arc<dyn Fn(Value, JobContext) -> BoxFuture<'static, JobResult<Value>> + Send + Sync>;

/// Context passed to a handler for one execution.
#[derive(Clone)]
pub struct JobContext {
    /// Application context built for this execution.
    pub app: AppContext,
    /// Snapshot of the job being run.
    pub job: JobHookInfo,
}

impl JobContext {
    /// Borrow the application context as `T`.
    pub fn app<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.app.downcast_ref::<T>()
    }

    /// Current attempt, 1-based.
    pub fn attempt(&self) -> u32 {
        self.job.attempts_made + 1
    }
}

/// Per-job backend options.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Base queue name. Defaults to `default`.
    pub queue: Option<String>,
    /// Per-job queue prefix, placed after the global prefix.
    pub queue_prefix: Option<String>,
    /// Total attempts. Falls back to the engine default.
    pub attempts: Option<u32>,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
    /// Schedule registered as a repeatable job at registration time.
    pub repeat: Option<ScheduleInput>,
}

/// A named handler with its options and hooks. Immutable once registered.
#[derive(Clone)]
pub struct JobDefinition {
    name: String,
    handler: JobHandler,
    options: JobOptions,
    hooks: JobHooks,
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl JobDefinition {
    /// Define a job with a typed input and output.
    ///
    /// Input that does not decode into `I` fails the execution with
    /// `INVALID_INPUT`, which is never retried.
    pub fn new<I, O, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<O>> + Send + 'static,
    {
        let name = name.into();
        let job = name.clone();
        let handler = Arc::new(handler);
        let erased: JobHandler = Arc::new(move |input: Value, ctx: JobContext| {
            let handler = handler.clone();
            let job = job.clone();
            async move {
                let input: I = serde_json::from_value(input).map_err(|e| JobError::InvalidInput {
                    job,
                    reason: e.to_string(),
                })?;
                let output = handler(input, ctx).await?;
                Ok(serde_json::to_value(output)?)
            }
            .boxed()
        });
        Self::from_handler(name, erased)
    }

    /// Define a job over raw JSON.
    pub fn raw<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<Value>> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move |input: Value, ctx: JobContext| handler(input, ctx).boxed());
        Self::from_handler(name, handler)
    }

    fn from_handler(name: impl Into<String>, handler: JobHandler) -> Self {
        Self {
            name: name.into(),
            handler,
            options: JobOptions::default(),
            hooks: JobHooks::default(),
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.options.queue = Some(queue.into());
        self
    }

    pub fn queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.queue_prefix = Some(prefix.into());
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.options.attempts = Some(attempts);
        self
    }

    pub fn remove_on_complete(mut self, remove: bool) -> Self {
        self.options.remove_on_complete = remove;
        self
    }

    pub fn remove_on_fail(mut self, remove: bool) -> Self {
        self.options.remove_on_fail = remove;
        self
    }

    pub fn repeat(mut self, schedule: impl Into<ScheduleInput>) -> Self {
        self.options.repeat = Some(schedule.into());
        self
    }

    pub fn hooks(mut self, hooks: JobHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn job_hooks(&self) -> &JobHooks {
        &self.hooks
    }

    /// Same definition registered under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Run the handler.
    pub fn invoke(&self, input: Value, ctx: JobContext) -> BoxFuture<'static, JobResult<Value>> {
        (self.handler)(input, ctx)
    }
}
