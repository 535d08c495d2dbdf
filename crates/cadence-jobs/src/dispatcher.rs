//! Worker dispatcher.
//!
//! Binds one backend processor per queue. Each delivery is resolved against
//! the registry by job name and run through the lifecycle runner; the
//! runner's result goes back to the backend unchanged. Backend events are
//! re-published to the observers given when the dispatcher started.

use crate::backend::{BackendEvent, JobRecord, ProcessorFn, QueueBackend, WorkerHandle, WorkerOptions};
use crate::error::{JobError, JobResult};
use crate::lifecycle::{Execution, ExecutionResult, LifecycleRunner};
use crate::metrics::DispatcherMetrics;
use crate::queue_name::{QueueName, QueueNamer};
use crate::registry::{split_job_path, NamespaceRegistry};
use crate::search::JobSearchResult;
use futures::future::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Observer of one job event.
pub type JobObserver = Arc<dyn Fn(&JobSearchResult) + Send + Sync>;

/// Observer of a failed delivery, with the error message.
pub type FailureObserver = Arc<dyn Fn(&JobSearchResult, &str) + Send + Sync>;

/// Observer of a queue running out of waiting jobs.
pub type IdleObserver = Arc<dyn Fn() + Send + Sync>;

/// What to start and which observers to attach.
#[derive(Clone, Default)]
pub struct WorkerSpec {
    pub queues: Vec<String>,
    pub concurrency: Option<usize>,
    /// Job names this dispatcher handles. `None` handles every job.
    pub job_filter: Option<Vec<String>>,
    pub on_active: Option<JobObserver>,
    pub on_success: Option<JobObserver>,
    pub on_failure: Option<FailureObserver>,
    pub on_idle: Option<IdleObserver>,
}

impl std::fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("queues", &self.queues)
            .field("concurrency", &self.concurrency)
            .field("job_filter", &self.job_filter)
            .finish_non_exhaustive()
    }
}

impl WorkerSpec {
    pub fn new<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queues: queues.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn job_filter<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.job_filter = Some(jobs.into_iter().map(Into::into).collect());
        self
    }

    pub fn on_active(mut self, observer: impl Fn(&JobSearchResult) + Send + Sync + 'static) -> Self {
        self.on_active = Some(Arc::new(observer));
        self
    }

    pub fn on_success(mut self, observer: impl Fn(&JobSearchResult) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(observer));
        self
    }

    pub fn on_failure(mut self, observer: impl Fn(&JobSearchResult, &str) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(observer));
        self
    }

    pub fn on_idle(mut self, observer: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_idle = Some(Arc::new(observer));
        self
    }

    /// Attach observers that log every event.
    pub fn with_logging(self) -> Self {
        self.on_active(|job| debug!(job_id = %job.id, job_name = %job.name, queue = %job.queue, "Job active"))
            .on_success(|job| info!(job_id = %job.id, job_name = %job.name, queue = %job.queue, "Job completed"))
            .on_failure(|job, error| {
                warn!(job_id = %job.id, job_name = %job.name, queue = %job.queue, error = %error, "Job failed")
            })
            .on_idle(|| debug!("Queue drained"))
    }

    fn has_observers(&self) -> bool {
        self.on_active.is_some() || self.on_success.is_some() || self.on_failure.is_some() || self.on_idle.is_some()
    }
}

/// Per-job concurrency caps, one semaphore per job name and cap.
type ConcurrencyLimits = Arc<Mutex<HashMap<(String, u32), Arc<Semaphore>>>>;

/// Semaphore bounding `job_name` to `max` concurrent deliveries. Deliveries
/// compiled with a different cap get their own semaphore.
fn limit_for(limits: &ConcurrencyLimits, job_name: &str, max: u32) -> Arc<Semaphore> {
    limits
        .lock()
        .entry((job_name.to_string(), max))
        .or_insert_with(|| Arc::new(Semaphore::new(usize::try_from(max).unwrap_or(usize::MAX))))
        .clone()
}

/// State shared by every delivery on one queue.
struct DeliveryContext {
    registry: Arc<NamespaceRegistry>,
    runner: LifecycleRunner,
    job_filter: Option<Vec<String>>,
    limits: ConcurrencyLimits,
}

impl DeliveryContext {
    async fn process(&self, record: JobRecord) -> JobResult<Value> {
        let Some(definition) = self.registry.get(&record.name) else {
            warn!(job_id = %record.id, job_name = %record.name, queue = %record.queue, "No registered job for delivery, dropping");
            return Ok(Value::Null);
        };

        if let Some(filter) = &self.job_filter {
            if !filter.iter().any(|name| *name == record.name) {
                debug!(job_id = %record.id, job_name = %record.name, "Job not in dispatcher filter, skipping");
                return Ok(Value::Null);
            }
        }

        let (namespace, _) = split_job_path(&record.name);

        let _permit = match record.options.metadata.max_concurrency.filter(|max| *max > 0) {
            Some(max) => {
                let semaphore = limit_for(&self.limits, &record.name, max);
                Some(
                    semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| JobError::Internal(e.to_string()))?,
                )
            }
            None => None,
        };

        let report = self
            .runner
            .run(Execution {
                definition: &definition,
                record: &record,
                namespace,
            })
            .await;
        debug!(
            job_id = %record.id,
            success = report.outcome.success,
            execution_ms = u64::try_from(report.outcome.execution_time.as_millis()).unwrap_or(u64::MAX),
            "Delivery finished"
        );
        report.result.map(ExecutionResult::into_value)
    }
}

struct ActiveDispatcher {
    handle: Arc<dyn WorkerHandle>,
    forwarder: Option<JoinHandle<()>>,
}

/// One dispatcher per queue, at most.
pub struct WorkerDispatcher {
    backend: Arc<dyn QueueBackend>,
    registry: Arc<NamespaceRegistry>,
    runner: LifecycleRunner,
    namer: QueueNamer,
    default_concurrency: usize,
    limits: ConcurrencyLimits,
    active: tokio::sync::Mutex<BTreeMap<QueueName, ActiveDispatcher>>,
}

impl std::fmt::Debug for WorkerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDispatcher")
            .field("namer", &self.namer)
            .field("default_concurrency", &self.default_concurrency)
            .finish_non_exhaustive()
    }
}

impl WorkerDispatcher {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        registry: Arc<NamespaceRegistry>,
        runner: LifecycleRunner,
        namer: QueueNamer,
        default_concurrency: usize,
    ) -> Self {
        Self {
            backend,
            registry,
            runner,
            namer,
            default_concurrency: default_concurrency.max(1),
            limits: Arc::new(Mutex::new(HashMap::new())),
            active: tokio::sync::Mutex::new(BTreeMap::new()),
        }
    }

    /// Start dispatchers for the requested queues. Returns the queues started.
    ///
    /// Wildcard names and queues that already have a dispatcher are skipped
    /// with a warning.
    pub async fn start(&self, spec: WorkerSpec) -> JobResult<Vec<QueueName>> {
        let mut started = Vec::new();
        let mut active = self.active.lock().await;

        for raw in &spec.queues {
            let queue = self.namer.resolve(raw)?;
            if queue.is_wildcard() {
                warn!(queue = %queue, "Wildcard queue names are not supported, list concrete queues");
                continue;
            }
            if active.contains_key(&queue) {
                warn!(queue = %queue, "Dispatcher already running for queue");
                continue;
            }

            let context = Arc::new(DeliveryContext {
                registry: self.registry.clone(),
                runner: self.runner.clone(),
                job_filter: spec.job_filter.clone(),
                limits: self.limits.clone(),
            });
            let processor: ProcessorFn = Arc::new(move |record: JobRecord| {
                let context = context.clone();
                let span = tracing::info_span!(
                    "job",
                    job_id = %record.id,
                    job_name = %record.name,
                    queue = %record.queue,
                    attempt = record.attempts_made + 1
                );
                async move { context.process(record).await }.instrument(span).boxed()
            });

            let concurrency = spec.concurrency.unwrap_or(self.default_concurrency).max(1);
            let handle = self
                .backend
                .bind_processor(&queue, processor, WorkerOptions { concurrency })
                .await?;

            let forwarder = spec
                .has_observers()
                .then(|| tokio::spawn(forward_events(handle.subscribe(), spec.clone())));

            info!(queue = %queue, concurrency, "Started worker dispatcher");
            active.insert(queue.clone(), ActiveDispatcher { handle, forwarder });
            started.push(queue);
        }

        DispatcherMetrics::set_active(active.len());
        Ok(started)
    }

    /// Queues with a running dispatcher.
    pub async fn queues(&self) -> Vec<QueueName> {
        self.active.lock().await.keys().cloned().collect()
    }

    /// Close every dispatcher.
    pub async fn close_all(&self) -> JobResult<()> {
        let mut active = self.active.lock().await;
        let mut first_error = None;
        for (queue, dispatcher) in std::mem::take(&mut *active) {
            if let Err(e) = dispatcher.handle.close().await {
                error!(queue = %queue, error = %e, "Failed to close worker");
                first_error.get_or_insert(e);
            }
            if let Some(forwarder) = dispatcher.forwarder {
                forwarder.abort();
            }
            info!(queue = %queue, "Stopped worker dispatcher");
        }
        DispatcherMetrics::set_active(0);
        first_error.map_or(Ok(()), Err)
    }
}

async fn forward_events(mut events: broadcast::Receiver<BackendEvent>, spec: WorkerSpec) {
    loop {
        match events.recv().await {
            Ok(BackendEvent::Active(job)) => {
                if let Some(observer) = &spec.on_active {
                    observer(&JobSearchResult::from(&job));
                }
            }
            Ok(BackendEvent::Completed(job)) => {
                if let Some(observer) = &spec.on_success {
                    observer(&JobSearchResult::from(&job));
                }
            }
            Ok(BackendEvent::Failed { job, error }) => {
                if let Some(observer) = &spec.on_failure {
                    observer(&JobSearchResult::from(&job), &error);
                }
            }
            Ok(BackendEvent::Drained) => {
                if let Some(observer) = &spec.on_idle {
                    observer();
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Observer fell behind, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
