//! Namespaced job routers.

use crate::definition::JobDefinition;
use std::collections::BTreeMap;

/// A set of job definitions owned by one namespace.
///
/// Jobs are keyed by their id inside the namespace; merging registers them
/// as `namespace.jobId`.
#[derive(Debug, Clone)]
pub struct JobsRouter {
    namespace: String,
    jobs: BTreeMap<String, JobDefinition>,
}

impl JobsRouter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            jobs: BTreeMap::new(),
        }
    }

    /// Add a job under its own name.
    pub fn job(self, definition: JobDefinition) -> Self {
        let id = definition.name().to_string();
        self.job_as(id, definition)
    }

    /// Add a job under an explicit id. A later job with the same id wins.
    pub fn job_as(mut self, id: impl Into<String>, definition: JobDefinition) -> Self {
        self.jobs.insert(id.into(), definition);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Job ids, sorted.
    pub fn job_ids(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub(crate) fn jobs(&self) -> impl Iterator<Item = (&str, &JobDefinition)> {
        self.jobs.iter().map(|(id, definition)| (id.as_str(), definition))
    }

    pub(crate) fn into_jobs(self) -> BTreeMap<String, JobDefinition> {
        self.jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_collects_jobs() {
        let router = JobsRouter::new("billing")
            .job(JobDefinition::raw("charge", |input, _ctx| async move { Ok(input) }))
            .job_as("refund", JobDefinition::raw("refundPayment", |input, _ctx| async move { Ok(input) }));
        assert_eq!(router.namespace(), "billing");
        assert_eq!(router.job_ids(), vec!["charge", "refund"]);
        assert_eq!(router.len(), 2);
        assert!(!router.is_empty());
    }
}
