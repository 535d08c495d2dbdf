//! Producer-side facades over merged routers.
//!
//! A [`MergedExecutor`] exposes one [`NamespaceExecutor`] per merged
//! namespace. Each enqueue resolves `namespace.jobId` through the registry
//! and its resolution cache before compiling the schedule.

use crate::engine::EngineCore;
use crate::error::JobResult;
use crate::registry::qualify;
use crate::schedule::ScheduleInput;
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One entry of a bulk enqueue.
#[derive(Debug, Clone)]
pub struct BulkItem {
    pub job_id: String,
    pub input: Value,
    pub schedule: Option<ScheduleInput>,
}

impl BulkItem {
    pub fn new(job_id: impl Into<String>, input: Value) -> Self {
        Self {
            job_id: job_id.into(),
            input,
            schedule: None,
        }
    }

    pub fn schedule(mut self, schedule: impl Into<ScheduleInput>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }
}

/// Enqueue operations scoped to one namespace.
#[derive(Clone)]
pub struct NamespaceExecutor {
    core: Arc<EngineCore>,
    namespace: String,
    jobs: Vec<String>,
}

impl std::fmt::Debug for NamespaceExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceExecutor")
            .field("namespace", &self.namespace)
            .field("jobs", &self.jobs)
            .finish()
    }
}

impl NamespaceExecutor {
    pub(crate) fn new(core: Arc<EngineCore>, namespace: String, jobs: Vec<String>) -> Self {
        Self { core, namespace, jobs }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Job ids registered under this namespace when the executor was built.
    pub fn job_ids(&self) -> &[String] {
        &self.jobs
    }

    /// Enqueue `job_id` for immediate execution.
    pub async fn enqueue(&self, job_id: &str, input: Value) -> JobResult<String> {
        self.core.enqueue_job(&qualify(&self.namespace, job_id), input, None).await
    }

    /// Enqueue `job_id` with a schedule.
    pub async fn schedule(&self, job_id: &str, input: Value, schedule: impl Into<ScheduleInput>) -> JobResult<String> {
        let schedule = schedule.into();
        self.core
            .enqueue_job(&qualify(&self.namespace, job_id), input, Some(&schedule))
            .await
    }

    /// Enqueue several jobs. Results are returned in input order; one
    /// failure does not stop the others.
    pub async fn bulk(&self, items: Vec<BulkItem>) -> Vec<JobResult<String>> {
        let enqueues = items.into_iter().map(|item| async move {
            self.core
                .enqueue_job(&qualify(&self.namespace, &item.job_id), item.input, item.schedule.as_ref())
                .await
        });
        join_all(enqueues).await
    }
}

/// Executors for every merged namespace.
#[derive(Clone)]
pub struct MergedExecutor {
    core: Arc<EngineCore>,
    namespaces: BTreeMap<String, NamespaceExecutor>,
}

impl std::fmt::Debug for MergedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergedExecutor")
            .field("namespaces", &self.namespaces.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MergedExecutor {
    pub(crate) fn new(core: Arc<EngineCore>, namespaces: BTreeMap<String, Vec<String>>) -> Self {
        let namespaces = namespaces
            .into_iter()
            .map(|(namespace, jobs)| {
                let executor = NamespaceExecutor::new(core.clone(), namespace.clone(), jobs);
                (namespace, executor)
            })
            .collect();
        Self { core, namespaces }
    }

    pub fn namespace(&self, namespace: &str) -> Option<&NamespaceExecutor> {
        self.namespaces.get(namespace)
    }

    pub fn namespaces(&self) -> Vec<&str> {
        self.namespaces.keys().map(String::as_str).collect()
    }

    /// Enqueue by namespace and job id without a typed handle.
    ///
    /// The namespace does not have to be part of this executor; any namespace
    /// known to the registry resolves.
    pub async fn call(&self, namespace: &str, job_id: &str, input: Value) -> JobResult<String> {
        let resolved = self.core.registry.resolve_in(namespace, job_id)?;
        self.core.enqueue_definition(&resolved.definition, input, None).await
    }
}
