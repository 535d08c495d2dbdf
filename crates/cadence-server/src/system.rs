//! Built-in `system` jobs: a heartbeat and a nightly cleanup report.

use cadence_jobs::{
    AdvancedScheduleSpec, AppContext, JobContext, JobDefinition, JobError, JobResult, JobsRouter, RepeatSpec,
    SchedulePreset,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Namespace of the built-in jobs.
pub const SYSTEM_NAMESPACE: &str = "system";

/// Queue the built-in jobs run on.
pub const SYSTEM_QUEUE: &str = "system";

/// Cron expression of the cleanup report (03:00 daily).
pub const CLEANUP_REPORT_CRON: &str = "0 3 * * *";

/// Process-wide state shared with system jobs through the app context.
#[derive(Debug)]
pub struct WorkerState {
    pub started_at: DateTime<Utc>,
    heartbeats: AtomicU64,
}

impl WorkerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started_at: Utc::now(),
            heartbeats: AtomicU64::new(0),
        })
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    /// Context factory handing this state to every execution.
    pub fn context_factory(self: &Arc<Self>) -> impl Fn() -> Result<AppContext, String> + Send + Sync + 'static {
        let state = self.clone();
        move || Ok(Arc::new(state.clone()) as AppContext)
    }
}

fn state(ctx: &JobContext) -> JobResult<&Arc<WorkerState>> {
    ctx.app::<Arc<WorkerState>>()
        .ok_or_else(|| JobError::Internal("worker state missing from job context".to_string()))
}

async fn heartbeat(_input: Value, ctx: JobContext) -> JobResult<Value> {
    let state = state(&ctx)?;
    let beats = state.heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
    debug!(beats, "Heartbeat");
    Ok(json!({ "beats": beats, "at": Utc::now() }))
}

async fn cleanup_report(_input: Value, ctx: JobContext) -> JobResult<Value> {
    let state = state(&ctx)?;
    let uptime = Utc::now() - state.started_at;
    let report = json!({
        "uptimeSeconds": uptime.num_seconds(),
        "heartbeats": state.heartbeats(),
        "attempt": ctx.attempt(),
    });
    info!(report = %report, "Cleanup report");
    Ok(report)
}

/// Router with the built-in jobs.
pub fn router() -> JobsRouter {
    JobsRouter::new(SYSTEM_NAMESPACE)
        .job(
            JobDefinition::raw("heartbeat", heartbeat)
                .queue(SYSTEM_QUEUE)
                .remove_on_complete(true)
                .repeat(SchedulePreset::EveryMinute),
        )
        .job(
            JobDefinition::raw("cleanup-report", cleanup_report)
                .queue(SYSTEM_QUEUE)
                .attempts(1)
                .repeat(AdvancedScheduleSpec::new().repeat(RepeatSpec::cron(CLEANUP_REPORT_CRON))),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_jobs::backend::InMemoryBackend;
    use cadence_jobs::{JobState, JobsConfig, JobsEngine, QueueNamer, WorkerSpec};

    #[tokio::test]
    async fn test_system_jobs_run_with_worker_state() {
        let state = WorkerState::new();
        let backend = InMemoryBackend::new();
        let engine = JobsEngine::builder(Arc::new(backend.clone()))
            .config(JobsConfig::default())
            .context_factory(state.context_factory())
            .build()
            .unwrap();

        let jobs = engine.merge(vec![router()]).await.unwrap();
        assert_eq!(jobs.namespace(SYSTEM_NAMESPACE).unwrap().job_ids(), ["cleanup-report", "heartbeat"]);
        engine.worker(WorkerSpec::new([SYSTEM_QUEUE])).await.unwrap();

        let queue = QueueNamer::default().name(None, Some(SYSTEM_QUEUE)).unwrap();
        backend.trigger(&queue, "repeat:system.heartbeat").unwrap();
        backend.process_next(&queue).await.unwrap().unwrap();
        backend.trigger(&queue, "repeat:system.cleanup-report").unwrap();
        backend.process_next(&queue).await.unwrap().unwrap();

        assert_eq!(state.heartbeats(), 1);
        let reports: Vec<_> = backend
            .jobs(&queue)
            .into_iter()
            .filter(|job| job.name == "system.cleanup-report" && job.state == JobState::Completed)
            .collect();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].return_value.as_ref().unwrap()["heartbeats"], json!(1));
    }
}
