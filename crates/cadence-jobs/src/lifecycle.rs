//! Hook lifecycle runner.
//!
//! One execution moves through `Pending -> Running -> {Succeeded, Failed} ->
//! Completed`. The skip check happens before `Running`; a skipped firing
//! goes straight to `Completed` with a synthetic success result. Hook
//! errors and panics are logged and counted, never turned into the job's
//! outcome. Handler errors are handed back unchanged so the backend can
//! apply its retry policy.

use crate::backend::JobRecord;
use crate::clock::{system_clock, Clock};
use crate::config::WebhookConfig;
use crate::definition::{JobContext, JobDefinition};
use crate::error::{JobError, JobResult};
use crate::hooks::{
    empty_context, AppContext, CompleteContext, ContextFactory, FailureContext, JobExecutionOutcome, JobHookInfo,
    StartContext, SuccessContext,
};
use crate::metrics::JobMetrics;
use crate::skip::{ConditionContext, SkipDecision, SkipEvaluator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// States of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Completed,
}

impl LifecycleState {
    pub const fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Running => "running",
            LifecycleState::Succeeded => "succeeded",
            LifecycleState::Failed => "failed",
            LifecycleState::Completed => "completed",
        }
    }
}

/// Result of an execution that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// The handler ran and returned a value.
    Completed(Value),
    /// The firing was skipped before the handler ran.
    Skipped {
        reason: &'static str,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionResult {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ExecutionResult::Skipped { .. })
    }

    /// Value stored by the backend as the job's return value.
    pub fn into_value(self) -> Value {
        match self {
            ExecutionResult::Completed(value) => value,
            ExecutionResult::Skipped { reason, timestamp } => json!({
                "skipped": true,
                "reason": reason,
                "timestamp": timestamp,
            }),
        }
    }
}

/// Everything one run of the lifecycle produced.
#[derive(Debug)]
pub struct ExecutionReport {
    pub result: JobResult<ExecutionResult>,
    pub outcome: JobExecutionOutcome,
}

/// Body of a completion webhook.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub job_id: String,
    pub job_name: String,
    pub queue: String,
    pub status: &'static str,
    pub result: Value,
    pub execution_time_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Sends completion notifications.
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    async fn notify(&self, url: &str, payload: &WebhookPayload) -> JobResult<()>;
}

/// Webhook notifier over `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestNotifier {
    client: reqwest::Client,
}

impl ReqwestNotifier {
    pub fn new(config: &WebhookConfig) -> JobResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| JobError::Configuration(format!("Failed to build webhook client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookNotifier for ReqwestNotifier {
    async fn notify(&self, url: &str, payload: &WebhookPayload) -> JobResult<()> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| JobError::Internal(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(JobError::Internal(format!("webhook returned {}", status)));
        }
        Ok(())
    }
}

/// One delivery, as seen by the runner.
#[derive(Debug, Clone, Copy)]
pub struct Execution<'a> {
    pub definition: &'a JobDefinition,
    pub record: &'a JobRecord,
    pub namespace: Option<&'a str>,
}

/// Runs the hook lifecycle around a handler.
#[derive(Clone)]
pub struct LifecycleRunner {
    skip: SkipEvaluator,
    notifier: Option<Arc<dyn WebhookNotifier>>,
    context_factory: Option<ContextFactory>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LifecycleRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleRunner")
            .field("skip", &self.skip)
            .field("notifier", &self.notifier.is_some())
            .field("context_factory", &self.context_factory.is_some())
            .finish()
    }
}

impl LifecycleRunner {
    pub fn new(skip: SkipEvaluator) -> Self {
        Self {
            skip,
            notifier: None,
            context_factory: None,
            clock: system_clock(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn WebhookNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_context_factory(mut self, factory: ContextFactory) -> Self {
        self.context_factory = Some(factory);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn skip_evaluator(&self) -> &SkipEvaluator {
        &self.skip
    }

    /// Build the application context for one execution.
    pub fn create_context(&self, job: &str) -> JobResult<AppContext> {
        match &self.context_factory {
            None => Ok(empty_context()),
            Some(factory) => {
                let created = std::panic::catch_unwind(AssertUnwindSafe(|| factory()))
                    .unwrap_or_else(|_| Err("context factory panicked".to_string()));
                created.map_err(|reason| JobError::ContextCreationFailed {
                    job: job.to_string(),
                    reason,
                })
            }
        }
    }

    /// Run one execution through the lifecycle.
    pub async fn run(&self, execution: Execution<'_>) -> ExecutionReport {
        let Execution {
            definition,
            record,
            namespace,
        } = execution;
        let hooks = definition.job_hooks();
        let metadata = &record.options.metadata;
        let job_name = definition.name();
        let started_at = self.clock.now();

        let mut info = JobHookInfo {
            id: record.id.clone(),
            name: job_name.to_string(),
            attempts_made: record.attempts_made,
            created_at: record.created_at,
            namespace: namespace.map(str::to_string),
            queue_name: record.queue.clone(),
            started_at,
            execution_time: None,
        };
        let attempts = record.options.attempts_or_default();
        let is_final_attempt = record.attempts_made >= attempts.saturating_sub(1);
        self.transition(&info, LifecycleState::Pending);

        let context = match self.create_context(job_name) {
            Ok(context) => context,
            Err(err) => {
                warn!(job_id = %record.id, job_name = %job_name, error = %err, "Context creation failed");
                JobMetrics::job_failed(&record.queue, job_name, err.code(), Duration::ZERO);
                let complete = CompleteContext {
                    input: record.payload.clone(),
                    context: empty_context(),
                    job: info,
                    success: false,
                    result: None,
                    error: Some(err.to_string()),
                    completed_at: self.clock.now(),
                    execution_time: Duration::ZERO,
                };
                self.run_hook(job_name, "on_complete", hooks.on_complete.as_ref(), complete)
                    .await;
                return ExecutionReport {
                    outcome: JobExecutionOutcome {
                        success: false,
                        result: None,
                        error: Some(err.to_string()),
                        execution_time: Duration::ZERO,
                        is_final_attempt,
                    },
                    result: Err(err),
                };
            }
        };

        let decision = self.skip.evaluate(
            metadata,
            &ConditionContext {
                job_name,
                job_id: &record.id,
                input: &record.payload,
                attempts_made: record.attempts_made,
                now: started_at,
            },
        );
        if let SkipDecision::Skip(reason) = decision {
            debug!(job_id = %record.id, job_name = %job_name, reason, "Skipping execution");
            JobMetrics::job_skipped(&record.queue, job_name, reason);
            let skipped = ExecutionResult::Skipped {
                reason,
                timestamp: started_at,
            };
            let value = skipped.clone().into_value();
            info.execution_time = Some(Duration::ZERO);
            let complete = CompleteContext {
                input: record.payload.clone(),
                context,
                job: info.clone(),
                success: true,
                result: Some(value.clone()),
                error: None,
                completed_at: started_at,
                execution_time: Duration::ZERO,
            };
            self.run_hook(job_name, "on_complete", hooks.on_complete.as_ref(), complete)
                .await;
            self.transition(&info, LifecycleState::Completed);
            return ExecutionReport {
                outcome: JobExecutionOutcome {
                    success: true,
                    result: Some(value),
                    error: None,
                    execution_time: Duration::ZERO,
                    is_final_attempt,
                },
                result: Ok(skipped),
            };
        }

        self.transition(&info, LifecycleState::Running);
        let start = StartContext {
            input: record.payload.clone(),
            context: context.clone(),
            job: info.clone(),
            started_at,
        };
        self.run_hook(job_name, "on_start", hooks.on_start.as_ref(), start)
            .await;

        let timer = Instant::now();
        let handler = definition.invoke(
            record.payload.clone(),
            JobContext {
                app: context.clone(),
                job: info.clone(),
            },
        );
        let result = run_handler(handler, metadata.timeout_ms).await;
        let execution_time = timer.elapsed();
        let finished_at = self.clock.now();
        info.execution_time = Some(execution_time);

        let (complete, report) = match result {
            Ok(value) => {
                self.transition(&info, LifecycleState::Succeeded);
                JobMetrics::job_completed(&record.queue, job_name, execution_time);
                let success = SuccessContext {
                    input: record.payload.clone(),
                    context: context.clone(),
                    job: info.clone(),
                    result: value.clone(),
                    completed_at: finished_at,
                    execution_time,
                };
                self.run_hook(job_name, "on_success", hooks.on_success.as_ref(), success)
                    .await;

                if let Some(url) = metadata.webhook_url.as_deref() {
                    self.notify_webhook(
                        url,
                        WebhookPayload {
                            job_id: record.id.clone(),
                            job_name: job_name.to_string(),
                            queue: record.queue.clone(),
                            status: "completed",
                            result: value.clone(),
                            execution_time_ms: u64::try_from(execution_time.as_millis()).unwrap_or(u64::MAX),
                            completed_at: finished_at,
                        },
                    );
                }

                (
                    CompleteContext {
                        input: record.payload.clone(),
                        context,
                        job: info.clone(),
                        success: true,
                        result: Some(value.clone()),
                        error: None,
                        completed_at: finished_at,
                        execution_time,
                    },
                    ExecutionReport {
                        outcome: JobExecutionOutcome {
                            success: true,
                            result: Some(value.clone()),
                            error: None,
                            execution_time,
                            is_final_attempt,
                        },
                        result: Ok(ExecutionResult::Completed(value)),
                    },
                )
            }
            Err(err) => {
                // The backend fails non-retryable errors without another attempt.
                let is_final_attempt = is_final_attempt || !err.is_retryable();
                self.transition(&info, LifecycleState::Failed);
                warn!(
                    job_id = %record.id,
                    job_name = %job_name,
                    attempt = record.attempts_made + 1,
                    is_final_attempt,
                    error = %err,
                    "Job execution failed"
                );
                JobMetrics::job_failed(&record.queue, job_name, err.code(), execution_time);
                let failure = FailureContext {
                    input: record.payload.clone(),
                    context: context.clone(),
                    job: info.clone(),
                    error: err.to_string(),
                    error_code: err.code(),
                    failed_at: finished_at,
                    execution_time,
                    is_final_attempt,
                };
                self.run_hook(job_name, "on_failure", hooks.on_failure.as_ref(), failure)
                    .await;

                (
                    CompleteContext {
                        input: record.payload.clone(),
                        context,
                        job: info.clone(),
                        success: false,
                        result: None,
                        error: Some(err.to_string()),
                        completed_at: finished_at,
                        execution_time,
                    },
                    ExecutionReport {
                        outcome: JobExecutionOutcome {
                            success: false,
                            result: None,
                            error: Some(err.to_string()),
                            execution_time,
                            is_final_attempt,
                        },
                        result: Err(err),
                    },
                )
            }
        };

        self.run_hook(job_name, "on_complete", hooks.on_complete.as_ref(), complete)
            .await;
        self.transition(&info, LifecycleState::Completed);
        report
    }

    fn transition(&self, info: &JobHookInfo, state: LifecycleState) {
        debug!(job_id = %info.id, job_name = %info.name, state = state.as_str(), "Lifecycle transition");
    }

    /// Run a hook, containing its errors and panics.
    async fn run_hook<C>(
        &self,
        job_name: &str,
        phase: &'static str,
        hook: Option<&Arc<dyn Fn(C) -> BoxFuture<'static, JobResult<()>> + Send + Sync>>,
        ctx: C,
    ) {
        let Some(hook) = hook else {
            return;
        };

        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| hook(ctx))) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(panic) => Err(panic),
        };

        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(_) => "hook panicked".to_string(),
        };
        warn!(job_name = %job_name, hook = phase, error = %error, "Job hook failed");
        JobMetrics::hook_error(job_name, phase);
    }

    fn notify_webhook(&self, url: &str, payload: WebhookPayload) {
        let Some(notifier) = self.notifier.clone() else {
            debug!(job_id = %payload.job_id, "Webhook URL set but no notifier configured");
            return;
        };
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&url, &payload).await {
                warn!(job_id = %payload.job_id, url = %url, error = %e, "Webhook notification failed");
                JobMetrics::webhook_failed(&payload.job_name);
            }
        });
    }
}

/// Run the handler, bounded by `timeout_ms` when set. A panic is a failure.
async fn run_handler(handler: BoxFuture<'static, JobResult<Value>>, timeout_ms: Option<u64>) -> JobResult<Value> {
    let guarded = AssertUnwindSafe(handler).catch_unwind();
    let outcome = match timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), guarded)
            .await
            .map_err(|_| JobError::Timeout(ms))?,
        None => guarded.await,
    };
    outcome.unwrap_or_else(|_| Err(JobError::failed("handler panicked")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::JobHooks;
    use crate::queue_name::QueueNamer;
    use crate::schedule::{AdvancedSchedulingRules, CompiledScheduleOptions, ScheduleMetadata};
    use crate::skip::{SKIP_REASON_CONDITION, SKIP_REASON_RULES};
    use chrono::TimeZone;
    use parking_lot::Mutex;

    type CallLog = Arc<Mutex<Vec<&'static str>>>;

    fn recording_hooks(log: &CallLog) -> JobHooks {
        let (a, b, c, d) = (log.clone(), log.clone(), log.clone(), log.clone());
        JobHooks::new()
            .on_start(move |_| {
                a.lock().push("onStart");
                async { Ok(()) }
            })
            .on_success(move |_| {
                b.lock().push("onSuccess");
                async { Ok(()) }
            })
            .on_failure(move |_| {
                c.lock().push("onFailure");
                async { Ok(()) }
            })
            .on_complete(move |_| {
                d.lock().push("onComplete");
                async { Ok(()) }
            })
    }

    fn record(options: CompiledScheduleOptions) -> JobRecord {
        let queue = QueueNamer::default().name(None, None).unwrap();
        JobRecord::new("1", &queue, "sendEmail", json!({"to": "a"}), options, Utc::now())
    }

    fn runner() -> LifecycleRunner {
        LifecycleRunner::new(SkipEvaluator::default())
    }

    #[tokio::test]
    async fn test_success_order() {
        let log = CallLog::default();
        let def = JobDefinition::raw("sendEmail", |input, _ctx| async move { Ok(input) }).hooks(recording_hooks(&log));
        let rec = record(CompiledScheduleOptions::default());

        let report = runner()
            .run(Execution {
                definition: &def,
                record: &rec,
                namespace: None,
            })
            .await;

        assert_eq!(*log.lock(), vec!["onStart", "onSuccess", "onComplete"]);
        assert_eq!(report.result.unwrap(), ExecutionResult::Completed(json!({"to": "a"})));
        assert!(report.outcome.success);
    }

    #[tokio::test]
    async fn test_failure_order_and_error_propagates() {
        let log = CallLog::default();
        let def = JobDefinition::raw("sendEmail", |_input, _ctx| async move { Err(JobError::failed("smtp down")) })
            .hooks(recording_hooks(&log));
        let rec = record(CompiledScheduleOptions {
            attempts: Some(3),
            ..CompiledScheduleOptions::default()
        });

        let report = runner()
            .run(Execution {
                definition: &def,
                record: &rec,
                namespace: None,
            })
            .await;

        assert_eq!(*log.lock(), vec!["onStart", "onFailure", "onComplete"]);
        let err = report.result.unwrap_err();
        assert_eq!(err.code(), "EXECUTION_FAILED");
        assert!(!report.outcome.is_final_attempt);
    }

    #[tokio::test]
    async fn test_final_attempt_flag() {
        let final_seen = Arc::new(Mutex::new(None));
        let seen = final_seen.clone();
        let def = JobDefinition::raw("sendEmail", |_input, _ctx| async move { Err(JobError::failed("nope")) }).hooks(
            JobHooks::new().on_failure(move |ctx| {
                *seen.lock() = Some(ctx.is_final_attempt);
                async { Ok(()) }
            }),
        );
        let mut rec = record(CompiledScheduleOptions {
            attempts: Some(3),
            ..CompiledScheduleOptions::default()
        });
        rec.attempts_made = 2;

        runner()
            .run(Execution {
                definition: &def,
                record: &rec,
                namespace: None,
            })
            .await;
        assert_eq!(*final_seen.lock(), Some(true));
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_final() {
        let final_seen = Arc::new(Mutex::new(Vec::new()));
        let seen = final_seen.clone();
        let def = JobDefinition::raw("sendEmail", |_input, _ctx| async move {
            Err(JobError::Internal("template missing".into()))
        })
        .hooks(JobHooks::new().on_failure(move |ctx| {
            seen.lock().push(ctx.is_final_attempt);
            async { Ok(()) }
        }));
        let rec = record(CompiledScheduleOptions {
            attempts: Some(3),
            ..CompiledScheduleOptions::default()
        });

        let report = runner()
            .run(Execution {
                definition: &def,
                record: &rec,
                namespace: None,
            })
            .await;
        assert_eq!(*final_seen.lock(), vec![true]);
        assert!(report.outcome.is_final_attempt);
        assert!(report.result.is_err());
    }

    #[tokio::test]
    async fn test_skip_runs_only_on_complete() {
        let log = CallLog::default();
        let calls = Arc::new(Mutex::new(0u32));
        let handler_calls = calls.clone();
        let def = JobDefinition::raw("sendEmail", move |input, _ctx| {
            *handler_calls.lock() += 1;
            async move { Ok(input) }
        })
        .hooks(recording_hooks(&log));

        let saturday = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let rec = record(CompiledScheduleOptions {
            metadata: ScheduleMetadata {
                advanced_scheduling: Some(AdvancedSchedulingRules {
                    skip_weekends: true,
                    ..AdvancedSchedulingRules::default()
                }),
                ..ScheduleMetadata::default()
            },
            ..CompiledScheduleOptions::default()
        });

        let report = runner()
            .with_clock(crate::clock::ManualClock::new(saturday))
            .run(Execution {
                definition: &def,
                record: &rec,
                namespace: None,
            })
            .await;

        assert_eq!(*log.lock(), vec!["onComplete"]);
        assert_eq!(*calls.lock(), 0);
        let value = report.result.unwrap().into_value();
        assert_eq!(value["skipped"], json!(true));
        assert_eq!(value["reason"], json!(SKIP_REASON_RULES));
    }

    #[tokio::test]
    async fn test_unknown_condition_skips() {
        let def = JobDefinition::raw("sendEmail", |input, _ctx| async move { Ok(input) });
        let rec = record(CompiledScheduleOptions {
            metadata: ScheduleMetadata {
                has_condition: true,
                condition: Some("isLeader".into()),
                ..ScheduleMetadata::default()
            },
            ..CompiledScheduleOptions::default()
        });
        let report = runner()
            .run(Execution {
                definition: &def,
                record: &rec,
                namespace: None,
            })
            .await;
        match report.result.unwrap() {
            ExecutionResult::Skipped { reason, .. } => assert_eq!(reason, SKIP_REASON_CONDITION),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hook_errors_and_panics_are_contained() {
        let def = JobDefinition::raw("sendEmail", |input, _ctx| async move { Ok(input) }).hooks(
            JobHooks::new()
                .on_start(|_| async { Err(JobError::failed("hook broke")) })
                .on_success(|_| -> futures::future::Ready<JobResult<()>> { panic!("hook panicked") }),
        );
        let rec = record(CompiledScheduleOptions::default());
        let report = runner()
            .run(Execution {
                definition: &def,
                record: &rec,
                namespace: None,
            })
            .await;
        assert!(report.result.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let log = CallLog::default();
        let def = JobDefinition::raw("slow", |input, _ctx| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(input)
        })
        .hooks(recording_hooks(&log));
        let rec = record(CompiledScheduleOptions {
            metadata: ScheduleMetadata {
                timeout_ms: Some(20),
                ..ScheduleMetadata::default()
            },
            ..CompiledScheduleOptions::default()
        });

        let report = runner()
            .run(Execution {
                definition: &def,
                record: &rec,
                namespace: None,
            })
            .await;
        assert!(matches!(report.result, Err(JobError::Timeout(20))));
        assert_eq!(*log.lock(), vec!["onStart", "onFailure", "onComplete"]);
    }

    #[tokio::test]
    async fn test_context_factory_failure_still_completes() {
        let log = CallLog::default();
        let def = JobDefinition::raw("sendEmail", |input, _ctx| async move { Ok(input) }).hooks(recording_hooks(&log));
        let rec = record(CompiledScheduleOptions::default());
        let runner = runner().with_context_factory(Arc::new(|| -> Result<AppContext, String> { Err("db unavailable".to_string()) }));

        let report = runner
            .run(Execution {
                definition: &def,
                record: &rec,
                namespace: None,
            })
            .await;
        assert_eq!(report.result.unwrap_err().code(), "CONTEXT_CREATION_FAILED");
        assert_eq!(*log.lock(), vec!["onComplete"]);
    }

    #[tokio::test]
    async fn test_handler_sees_context_and_namespace() {
        struct Tenant(&'static str);
        let def = JobDefinition::raw("billing.charge", |_input, ctx: JobContext| async move {
            let tenant = ctx.app::<Tenant>().map(|t| t.0).unwrap_or("none");
            Ok(json!({"tenant": tenant, "namespace": ctx.job.namespace}))
        });
        let rec = record(CompiledScheduleOptions::default());
        let runner = runner().with_context_factory(Arc::new(|| -> Result<AppContext, String> { Ok(Arc::new(Tenant("acme"))) }));

        let report = runner
            .run(Execution {
                definition: &def,
                record: &rec,
                namespace: Some("billing"),
            })
            .await;
        assert_eq!(
            report.result.unwrap(),
            ExecutionResult::Completed(json!({"tenant": "acme", "namespace": "billing"}))
        );
    }
}
