//! The jobs engine.
//!
//! [`JobsEngine`] ties the registry, the schedule compiler, the backend and
//! the worker dispatcher together. Registration, router merging, invocation
//! and search all go through it; [`shutdown`](JobsEngine::shutdown) releases
//! everything in dependency order.

use crate::backend::{JobState, QueueBackend};
use crate::clock::{system_clock, Clock};
use crate::config::JobsConfig;
use crate::definition::JobDefinition;
use crate::dispatcher::{WorkerDispatcher, WorkerSpec};
use crate::error::{JobError, JobResult};
use crate::executor::{MergedExecutor, NamespaceExecutor};
use crate::hooks::ContextFactory;
use crate::lifecycle::{LifecycleRunner, ReqwestNotifier, WebhookNotifier};
use crate::metrics::JobMetrics;
use crate::queue_name::{QueueName, QueueNamer};
use crate::registry::{qualify, NamespaceRegistry};
use crate::router::JobsRouter;
use crate::schedule::{
    compile, validate_cron, AdvancedScheduleSpec, CompiledScheduleOptions, RepeatSpec, ScheduleInput,
};
use crate::search::{self, JobSearchResult, SearchQuery};
use crate::skip::{ConditionContext, ConditionRegistry, SkipEvaluator};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State shared by the engine and its executors.
pub(crate) struct EngineCore {
    pub(crate) registry: Arc<NamespaceRegistry>,
    pub(crate) backend: Arc<dyn QueueBackend>,
    pub(crate) namer: QueueNamer,
    pub(crate) config: JobsConfig,
    pub(crate) clock: Arc<dyn Clock>,
}

impl EngineCore {
    /// Queue a definition is delivered on.
    pub(crate) fn queue_for(&self, definition: &JobDefinition) -> JobResult<QueueName> {
        let options = definition.options();
        self.namer.name(options.queue_prefix.as_deref(), options.queue.as_deref())
    }

    /// Compile the schedule and merge the definition's own options.
    fn options_for(
        &self,
        definition: &JobDefinition,
        schedule: Option<&ScheduleInput>,
    ) -> JobResult<CompiledScheduleOptions> {
        self.options_named(definition.name(), definition, schedule)
    }

    /// [`options_for`](Self::options_for) for a job registered as `name`.
    fn options_named(
        &self,
        name: &str,
        definition: &JobDefinition,
        schedule: Option<&ScheduleInput>,
    ) -> JobResult<CompiledScheduleOptions> {
        let mut options = match schedule {
            Some(schedule) => compile(schedule, name, self.clock.now()).map_err(|e| {
                JobMetrics::schedule_rejected(name, e.code());
                warn!(job_name = %name, error = %e, "Schedule rejected");
                e
            })?,
            None => CompiledScheduleOptions::default(),
        };

        let defaults = definition.options();
        if options.attempts.is_none() {
            options.attempts = Some(defaults.attempts.unwrap_or(self.config.default_attempts));
        }
        options.remove_on_complete |= defaults.remove_on_complete;
        options.remove_on_fail |= defaults.remove_on_fail;
        Ok(options)
    }

    pub(crate) async fn enqueue_definition(
        &self,
        definition: &JobDefinition,
        input: Value,
        schedule: Option<&ScheduleInput>,
    ) -> JobResult<String> {
        let queue = self.queue_for(definition)?;
        let options = self.options_for(definition, schedule)?;
        let name = definition.name();

        let id = self.backend.enqueue(&queue, name, input, &options).await?;
        JobMetrics::job_enqueued(queue.as_str(), name);
        debug!(
            job_id = %id,
            job_name = %name,
            queue = %queue,
            delay_ms = options.delay.unwrap_or(0),
            priority = options.priority.unwrap_or(0),
            "Job enqueued"
        );
        Ok(id)
    }

    /// Resolve `path` and enqueue it.
    pub(crate) async fn enqueue_job(
        &self,
        path: &str,
        input: Value,
        schedule: Option<&ScheduleInput>,
    ) -> JobResult<String> {
        let resolved = self.registry.resolve(path)?;
        self.enqueue_definition(&resolved.definition, input, schedule).await
    }
}

/// A compiled repeat schedule waiting for its job to be registered.
struct PreparedRepeat {
    queue: QueueName,
    name: String,
    options: CompiledScheduleOptions,
}

/// A request to run a registered job.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Registered name or `namespace.jobId` path.
    pub id: String,
    pub input: Value,
    pub schedule: Option<ScheduleInput>,
}

impl InvokeRequest {
    pub fn new(id: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            input,
            schedule: None,
        }
    }

    pub fn schedule(mut self, schedule: impl Into<ScheduleInput>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }
}

/// Builder for [`JobsEngine`].
pub struct JobsEngineBuilder {
    backend: Arc<dyn QueueBackend>,
    config: JobsConfig,
    clock: Arc<dyn Clock>,
    context_factory: Option<ContextFactory>,
    notifier: Option<Arc<dyn WebhookNotifier>>,
}

impl JobsEngineBuilder {
    pub fn config(mut self, config: JobsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Factory for the application context handed to handlers and hooks.
    pub fn context_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<crate::hooks::AppContext, String> + Send + Sync + 'static,
    {
        self.context_factory = Some(Arc::new(factory));
        self
    }

    /// Replace the default `reqwest` webhook notifier.
    pub fn notifier(mut self, notifier: Arc<dyn WebhookNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> JobResult<JobsEngine> {
        self.config.validate().map_err(JobError::Configuration)?;

        let namer = QueueNamer::new(self.config.queue_prefix.clone())?;
        let registry = Arc::new(NamespaceRegistry::new(&self.config.resolution_cache));
        let conditions = ConditionRegistry::new();

        let notifier: Arc<dyn WebhookNotifier> = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(ReqwestNotifier::new(&self.config.webhook)?),
        };
        let mut runner = LifecycleRunner::new(SkipEvaluator::new(conditions.clone()))
            .with_notifier(notifier)
            .with_clock(self.clock.clone());
        if let Some(factory) = self.context_factory {
            runner = runner.with_context_factory(factory);
        }

        let dispatcher = WorkerDispatcher::new(
            self.backend.clone(),
            registry.clone(),
            runner.clone(),
            namer.clone(),
            self.config.worker.concurrency,
        );

        info!(
            queue_prefix = ?self.config.queue_prefix,
            auto_start = self.config.worker.auto_start,
            "Jobs engine ready"
        );

        Ok(JobsEngine {
            core: Arc::new(EngineCore {
                registry,
                backend: self.backend,
                namer,
                config: self.config,
                clock: self.clock,
            }),
            conditions,
            runner,
            dispatcher,
        })
    }
}

/// Job scheduling and execution engine.
pub struct JobsEngine {
    core: Arc<EngineCore>,
    conditions: ConditionRegistry,
    runner: LifecycleRunner,
    dispatcher: WorkerDispatcher,
}

impl std::fmt::Debug for JobsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobsEngine")
            .field("jobs", &self.core.registry.len())
            .field("runner", &self.runner)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl JobsEngine {
    pub fn builder(backend: Arc<dyn QueueBackend>) -> JobsEngineBuilder {
        JobsEngineBuilder {
            backend,
            config: JobsConfig::default(),
            clock: system_clock(),
            context_factory: None,
            notifier: None,
        }
    }

    /// Engine with the system clock and the given configuration.
    pub fn new(backend: Arc<dyn QueueBackend>, config: JobsConfig) -> JobResult<Self> {
        Self::builder(backend).config(config).build()
    }

    pub fn registry(&self) -> &Arc<NamespaceRegistry> {
        &self.core.registry
    }

    pub fn config(&self) -> &JobsConfig {
        &self.core.config
    }

    /// Register a named condition for `AdvancedScheduleSpec::condition`.
    pub fn register_condition<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&ConditionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.conditions.register(name, predicate);
    }

    /// Register one job. A repeat schedule on the definition is enqueued
    /// right away.
    ///
    /// The repeat schedule is compiled first; an invalid one registers
    /// nothing and sends nothing to the backend.
    pub async fn register(&self, definition: JobDefinition) -> JobResult<Arc<JobDefinition>> {
        self.runner.create_context(definition.name())?;
        let repeats: Vec<PreparedRepeat> = self
            .prepare_repeat(definition.name(), &definition)?
            .into_iter()
            .collect();
        let registered = self.core.registry.register(definition)?;
        self.enqueue_repeats(repeats).await?;
        self.auto_start(std::slice::from_ref(&registered)).await?;
        Ok(registered)
    }

    /// Register several jobs keyed by name. Nothing is registered unless
    /// every repeat schedule compiles.
    pub async fn bulk_register<I>(&self, jobs: I) -> JobResult<Vec<Arc<JobDefinition>>>
    where
        I: IntoIterator<Item = (String, JobDefinition)>,
    {
        let jobs: Vec<(String, JobDefinition)> = jobs.into_iter().collect();
        let mut repeats = Vec::new();
        for (name, definition) in &jobs {
            self.runner.create_context(name)?;
            repeats.extend(self.prepare_repeat(name, definition)?);
        }
        let registered = self.core.registry.bulk_register(jobs)?;
        self.enqueue_repeats(repeats).await?;
        self.auto_start(&registered).await?;
        Ok(registered)
    }

    /// Merge namespaced routers and return executors for them.
    ///
    /// On a namespace conflict or an invalid repeat schedule nothing is
    /// registered.
    pub async fn merge(&self, routers: Vec<JobsRouter>) -> JobResult<MergedExecutor> {
        let layout: BTreeMap<String, Vec<String>> = routers
            .iter()
            .map(|router| {
                let jobs = router.job_ids().into_iter().map(str::to_string).collect();
                (router.namespace().to_string(), jobs)
            })
            .collect();
        let mut repeats = Vec::new();
        for router in &routers {
            self.runner.create_context(router.namespace())?;
            for (job_id, definition) in router.jobs() {
                let name = qualify(router.namespace(), job_id);
                repeats.extend(self.prepare_repeat(&name, definition)?);
            }
        }

        let registered = self.core.registry.merge(routers)?;
        self.enqueue_repeats(repeats).await?;
        self.auto_start(&registered).await?;
        Ok(MergedExecutor::new(self.core.clone(), layout))
    }

    /// Start a router for `namespace`, to be passed to [`merge`](Self::merge).
    pub fn router(&self, namespace: impl Into<String>) -> JobsRouter {
        JobsRouter::new(namespace)
    }

    /// Executor for one merged namespace.
    pub fn namespace_executor(&self, namespace: &str) -> Option<NamespaceExecutor> {
        let jobs = self.core.registry.jobs_in(namespace);
        if jobs.is_empty() {
            return None;
        }
        Some(NamespaceExecutor::new(self.core.clone(), namespace.to_string(), jobs))
    }

    /// Executor over every merged namespace.
    pub fn executor(&self) -> MergedExecutor {
        let layout = self
            .core
            .registry
            .namespaces()
            .into_iter()
            .map(|namespace| {
                let jobs = self.core.registry.jobs_in(&namespace);
                (namespace, jobs)
            })
            .collect();
        MergedExecutor::new(self.core.clone(), layout)
    }

    /// Enqueue a registered job. Returns the backend job id.
    pub async fn invoke(&self, request: InvokeRequest) -> JobResult<String> {
        self.core
            .enqueue_job(&request.id, request.input, request.schedule.as_ref())
            .await
    }

    /// Register `definition` to repeat on a cron expression.
    pub async fn cron(&self, expression: &str, definition: JobDefinition) -> JobResult<Arc<JobDefinition>> {
        validate_cron(expression)?;
        let schedule = AdvancedScheduleSpec::new().repeat(RepeatSpec::cron(expression));
        self.register(definition.repeat(schedule)).await
    }

    /// Search jobs in one queue or across every known queue.
    pub async fn search(&self, query: SearchQuery) -> JobResult<Vec<JobSearchResult>> {
        let queues = match &query.queue {
            Some(queue) => vec![self.core.namer.resolve(queue)?],
            None => self.queue_names(),
        };

        let mut records = Vec::new();
        for queue in &queues {
            if queue.is_wildcard() {
                warn!(queue = %queue, "Wildcard queues cannot be searched");
                continue;
            }
            let mut jobs = self.core.backend.get_jobs(queue, &JobState::ALL, 0, usize::MAX).await?;
            records.append(&mut jobs);
        }
        Ok(search::apply(&records, &query.filter))
    }

    /// Start dispatchers for the given queues.
    pub async fn worker(&self, spec: WorkerSpec) -> JobResult<Vec<QueueName>> {
        self.dispatcher.start(spec).await
    }

    /// Queues used by registered jobs, sorted.
    pub fn queue_names(&self) -> Vec<QueueName> {
        let mut queues = BTreeSet::new();
        for definition in self.core.registry.definitions() {
            match self.core.queue_for(&definition) {
                Ok(queue) => {
                    queues.insert(queue);
                }
                Err(e) => warn!(job_name = %definition.name(), error = %e, "Skipping job with invalid queue"),
            }
        }
        queues.into_iter().collect()
    }

    /// Stop workers, close queues and the backend, then clear the registry.
    pub async fn shutdown(&self) -> JobResult<()> {
        info!("Shutting down jobs engine");
        self.dispatcher.close_all().await?;
        for queue in self.queue_names() {
            self.core.backend.close_queue(&queue).await?;
        }
        self.core.backend.close().await?;
        self.core.registry.clear();
        info!("Jobs engine stopped");
        Ok(())
    }

    /// Compile the repeat schedule of a job registered as `name`.
    fn prepare_repeat(&self, name: &str, definition: &JobDefinition) -> JobResult<Option<PreparedRepeat>> {
        let Some(schedule) = &definition.options().repeat else {
            return Ok(None);
        };
        let queue = self.core.queue_for(definition)?;
        let mut options = self.core.options_named(name, definition, Some(schedule))?;
        if options.repeat.is_none() {
            return Err(JobError::InvalidSchedule(format!(
                "repeat schedule for job '{}' has no repeat rule",
                name
            )));
        }
        options.job_id.get_or_insert_with(|| format!("repeat:{}", name));
        Ok(Some(PreparedRepeat {
            queue,
            name: name.to_string(),
            options,
        }))
    }

    async fn enqueue_repeats(&self, repeats: Vec<PreparedRepeat>) -> JobResult<()> {
        for repeat in repeats {
            let id = self
                .core
                .backend
                .enqueue(&repeat.queue, &repeat.name, json!({}), &repeat.options)
                .await?;
            JobMetrics::job_enqueued(repeat.queue.as_str(), &repeat.name);
            info!(job_name = %repeat.name, job_id = %id, queue = %repeat.queue, "Scheduled repeating job");
        }
        Ok(())
    }

    async fn auto_start(&self, definitions: &[Arc<JobDefinition>]) -> JobResult<()> {
        let config = &self.core.config.worker;
        if !config.auto_start || definitions.is_empty() {
            return Ok(());
        }

        let queues: BTreeSet<QueueName> = definitions
            .iter()
            .map(|definition| self.core.queue_for(definition))
            .collect::<JobResult<_>>()?;
        let mut spec = WorkerSpec::new(queues.iter().map(|queue| queue.as_str().to_string()))
            .concurrency(config.concurrency);
        if config.debug {
            spec = spec.with_logging();
        }
        self.dispatcher.start(spec).await?;
        Ok(())
    }
}
