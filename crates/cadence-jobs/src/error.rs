//! Job error types.

use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
///
/// Every variant maps to a stable code through [`JobError::code`], which
/// callers can match on without parsing messages.
#[derive(Debug, Error)]
pub enum JobError {
    /// The schedule specification cannot be compiled.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A cron expression failed validation.
    #[error("Invalid cron expression '{expression}' (field {field}): {reason}")]
    InvalidCron {
        expression: String,
        field: usize,
        reason: String,
    },

    /// Two merged routers declared the same namespace.
    #[error("Namespace conflict: duplicate namespaces [{}]", .0.join(", "))]
    NamespaceConflict(Vec<String>),

    /// A job path did not resolve against the registry.
    #[error("Job not found: {path} (available: [{}])", .available.join(", "))]
    JobNotFound { path: String, available: Vec<String> },

    /// The application context factory failed while wrapping a job.
    #[error("Context creation failed for job {job}: {reason}")]
    ContextCreationFailed { job: String, reason: String },

    /// A queue name component is not usable.
    #[error("Invalid queue name: {0}")]
    InvalidQueueName(String),

    /// The job input could not be decoded into the handler's input type.
    #[error("Invalid input for job {job}: {reason}")]
    InvalidInput { job: String, reason: String },

    /// Job execution failed.
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Job timed out.
    #[error("Job timed out after {0} ms")]
    Timeout(u64),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Backend error not covered by a more specific variant.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Returns the stable, machine-readable code for this error.
    pub const fn code(&self) -> &'static str {
        match self {
            JobError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            JobError::InvalidCron { .. } => "INVALID_CRON",
            JobError::NamespaceConflict(_) => "NAMESPACE_CONFLICT",
            JobError::JobNotFound { .. } => "JOB_NOT_FOUND",
            JobError::ContextCreationFailed { .. } => "CONTEXT_CREATION_FAILED",
            JobError::InvalidQueueName(_) => "INVALID_QUEUE_NAME",
            JobError::InvalidInput { .. } => "INVALID_INPUT",
            JobError::ExecutionFailed(_) => "EXECUTION_FAILED",
            JobError::Timeout(_) => "TIMEOUT",
            JobError::Serialization(_) => "SERIALIZATION",
            JobError::Redis(_) | JobError::Pool(_) | JobError::Backend(_) => "BACKEND",
            JobError::Configuration(_) => "CONFIGURATION",
            JobError::Internal(_) => "INTERNAL",
        }
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::ExecutionFailed(_)
                | JobError::Timeout(_)
                | JobError::ContextCreationFailed { .. }
                | JobError::Redis(_)
                | JobError::Pool(_)
                | JobError::Backend(_)
        )
    }

    /// Convenience constructor for handler failures.
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::ExecutionFailed(message.into())
    }
}

impl From<cadence_core::CadenceError> for JobError {
    fn from(err: cadence_core::CadenceError) -> Self {
        match err {
            cadence_core::CadenceError::Configuration(msg) => JobError::Configuration(msg),
            other => JobError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(JobError::InvalidSchedule("x".into()).code(), "INVALID_SCHEDULE");
        assert_eq!(
            JobError::InvalidCron {
                expression: "60 * * * *".into(),
                field: 0,
                reason: "out of range".into(),
            }
            .code(),
            "INVALID_CRON"
        );
        assert_eq!(JobError::NamespaceConflict(vec!["billing".into()]).code(), "NAMESPACE_CONFLICT");
        assert_eq!(
            JobError::JobNotFound {
                path: "billing.charge".into(),
                available: vec![],
            }
            .code(),
            "JOB_NOT_FOUND"
        );
        assert_eq!(
            JobError::ContextCreationFailed {
                job: "a".into(),
                reason: "b".into(),
            }
            .code(),
            "CONTEXT_CREATION_FAILED"
        );
        assert_eq!(JobError::Backend("down".into()).code(), "BACKEND");
    }

    #[test]
    fn test_is_retryable_execution_failed() {
        assert!(JobError::failed("oops").is_retryable());
        assert!(JobError::Timeout(30_000).is_retryable());
    }

    #[test]
    fn test_validation_errors_are_not_retryable() {
        assert!(!JobError::InvalidSchedule("past".into()).is_retryable());
        assert!(!JobError::NamespaceConflict(vec![]).is_retryable());
        assert!(!JobError::InvalidInput {
            job: "a".into(),
            reason: "missing field".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_display_lists_duplicates() {
        let err = JobError::NamespaceConflict(vec!["billing".into(), "users".into()]);
        assert_eq!(err.to_string(), "Namespace conflict: duplicate namespaces [billing, users]");
    }

    #[test]
    fn test_display_job_not_found_lists_available() {
        let err = JobError::JobNotFound {
            path: "billing.refund".into(),
            available: vec!["charge".into(), "invoice".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("billing.refund"));
        assert!(msg.contains("charge, invoice"));
    }

    #[test]
    fn test_display_cron_includes_field_index() {
        let err = JobError::InvalidCron {
            expression: "60 * * * *".into(),
            field: 0,
            reason: "minute out of range".into(),
        };
        assert!(err.to_string().contains("field 0"));
    }

    #[test]
    fn test_from_cadence_error() {
        let err = JobError::from(cadence_core::CadenceError::configuration("no url"));
        assert!(matches!(err, JobError::Configuration(msg) if msg == "no url"));

        let err = JobError::from(cadence_core::CadenceError::internal("database down"));
        match err {
            JobError::Internal(msg) => assert!(msg.contains("database down")),
            _ => panic!("Expected Internal error"),
        }
    }
}
