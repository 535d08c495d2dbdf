//! Prometheus metrics for the job engine.
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job engine.
pub mod names {
    /// Total jobs handed to the backend.
    pub const JOBS_ENQUEUED_TOTAL: &str = "cadence_jobs_enqueued_total";
    /// Total executions that completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "cadence_jobs_completed_total";
    /// Total executions that failed.
    pub const JOBS_FAILED_TOTAL: &str = "cadence_jobs_failed_total";
    /// Total firings skipped by schedule rules or conditions.
    pub const JOBS_SKIPPED_TOTAL: &str = "cadence_jobs_skipped_total";
    /// Total lifecycle hook errors (contained).
    pub const JOBS_HOOK_ERRORS_TOTAL: &str = "cadence_jobs_hook_errors_total";
    /// Total webhook notifications that failed.
    pub const JOBS_WEBHOOK_FAILURES_TOTAL: &str = "cadence_jobs_webhook_failures_total";
    /// Total schedules rejected at compile time.
    pub const SCHEDULE_REJECTED_TOTAL: &str = "cadence_schedule_rejected_total";

    /// Handler execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "cadence_job_duration_seconds";

    /// Active worker dispatchers.
    pub const DISPATCHERS_ACTIVE: &str = "cadence_dispatchers_active";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of job executions completed successfully"
    );
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of job executions that failed");
    describe_counter!(
        names::JOBS_SKIPPED_TOTAL,
        "Total number of job firings skipped at run time"
    );
    describe_counter!(
        names::JOBS_HOOK_ERRORS_TOTAL,
        "Total number of lifecycle hook errors"
    );
    describe_counter!(
        names::JOBS_WEBHOOK_FAILURES_TOTAL,
        "Total number of failed webhook notifications"
    );
    describe_counter!(
        names::SCHEDULE_REJECTED_TOTAL,
        "Total number of schedules rejected during compilation"
    );

    describe_histogram!(names::JOB_DURATION_SECONDS, "Job execution duration in seconds");

    describe_gauge!(names::DISPATCHERS_ACTIVE, "Number of active worker dispatchers");
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record a successful execution.
    pub fn job_completed(queue: &str, job_name: &str, duration: Duration) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed execution.
    pub fn job_failed(queue: &str, job_name: &str, error_code: &str, duration: Duration) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "error_code" => error_code.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a skipped firing.
    pub fn job_skipped(queue: &str, job_name: &str, reason: &str) {
        counter!(
            names::JOBS_SKIPPED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// Record a contained hook error.
    pub fn hook_error(job_name: &str, hook: &str) {
        counter!(
            names::JOBS_HOOK_ERRORS_TOTAL,
            "job_name" => job_name.to_string(),
            "hook" => hook.to_string()
        )
        .increment(1);
    }

    /// Record a failed webhook notification.
    pub fn webhook_failed(job_name: &str) {
        counter!(
            names::JOBS_WEBHOOK_FAILURES_TOTAL,
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record a schedule rejected by the compiler.
    pub fn schedule_rejected(job_name: &str, error_code: &str) {
        counter!(
            names::SCHEDULE_REJECTED_TOTAL,
            "job_name" => job_name.to_string(),
            "error_code" => error_code.to_string()
        )
        .increment(1);
    }
}

/// Dispatcher metrics recorder.
#[derive(Clone)]
pub struct DispatcherMetrics;

impl DispatcherMetrics {
    /// Set the number of active dispatchers.
    pub fn set_active(count: usize) {
        gauge!(names::DISPATCHERS_ACTIVE).set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_share_prefix() {
        for name in [
            names::JOBS_ENQUEUED_TOTAL,
            names::JOBS_COMPLETED_TOTAL,
            names::JOBS_FAILED_TOTAL,
            names::JOBS_SKIPPED_TOTAL,
            names::JOBS_HOOK_ERRORS_TOTAL,
            names::JOBS_WEBHOOK_FAILURES_TOTAL,
            names::SCHEDULE_REJECTED_TOTAL,
            names::JOB_DURATION_SECONDS,
            names::DISPATCHERS_ACTIVE,
        ] {
            assert!(name.starts_with("cadence_"), "{name}");
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        register_metrics();
        JobMetrics::job_enqueued("default", "sendEmail");
        JobMetrics::job_completed("default", "sendEmail", Duration::from_millis(5));
        JobMetrics::job_failed("default", "sendEmail", "EXECUTION_FAILED", Duration::from_millis(5));
        JobMetrics::job_skipped("default", "sendEmail", "Condition not met");
        JobMetrics::hook_error("sendEmail", "on_start");
        JobMetrics::webhook_failed("sendEmail");
        JobMetrics::schedule_rejected("sendEmail", "INVALID_CRON");
        DispatcherMetrics::set_active(2);
    }
}
