//! Dependency injection interface for the jobs engine.

use crate::engine::{InvokeRequest, JobsEngine};
use crate::error::JobResult;
use crate::queue_name::QueueName;
use crate::search::{JobSearchResult, SearchQuery};
use async_trait::async_trait;
use cadence_core::Interface;

/// Producer-side view of the engine for components resolved from a
/// `shaku` module.
#[async_trait]
pub trait JobSchedulerInterface: Interface + Send + Sync {
    /// Enqueue a registered job and return its backend id.
    async fn invoke(&self, request: InvokeRequest) -> JobResult<String>;

    /// Search jobs.
    async fn search(&self, query: SearchQuery) -> JobResult<Vec<JobSearchResult>>;

    /// Queues used by registered jobs.
    fn queue_names(&self) -> Vec<QueueName>;

    /// Stop workers and release the backend.
    async fn shutdown(&self) -> JobResult<()>;
}

#[async_trait]
impl JobSchedulerInterface for JobsEngine {
    async fn invoke(&self, request: InvokeRequest) -> JobResult<String> {
        JobsEngine::invoke(self, request).await
    }

    async fn search(&self, query: SearchQuery) -> JobResult<Vec<JobSearchResult>> {
        JobsEngine::search(self, query).await
    }

    fn queue_names(&self) -> Vec<QueueName> {
        JobsEngine::queue_names(self)
    }

    async fn shutdown(&self) -> JobResult<()> {
        JobsEngine::shutdown(self).await
    }
}
