//! Deterministic queue naming for multi-tenant isolation.
//!
//! The same [`QueueNamer`] is used when enqueuing and when binding workers,
//! so both sides always agree on the backend queue identifier.

use crate::error::{JobError, JobResult};
use std::fmt;

/// Separator placed between the non-empty name components.
pub const QUEUE_NAME_SEPARATOR: &str = ":";

/// Base name used when a job does not declare a queue.
pub const DEFAULT_QUEUE: &str = "default";

/// Backend queue identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueName(String);

impl QueueName {
    /// Returns the queue name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the name contains a glob-style wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.0.contains('*')
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QueueName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_part(kind: &str, part: &str) -> JobResult<()> {
    if part.contains(QUEUE_NAME_SEPARATOR) {
        return Err(JobError::InvalidQueueName(format!(
            "{} '{}' must not contain '{}'",
            kind, part, QUEUE_NAME_SEPARATOR
        )));
    }
    if part.chars().any(char::is_whitespace) {
        return Err(JobError::InvalidQueueName(format!(
            "{} '{}' must not contain whitespace",
            kind, part
        )));
    }
    Ok(())
}

/// Builds a queue name from `(global prefix, job prefix, base name)`.
///
/// Empty components are skipped; a missing or empty base name falls back to
/// [`DEFAULT_QUEUE`]. Components containing the separator are rejected.
pub fn build_queue_name(
    global_prefix: Option<&str>,
    job_prefix: Option<&str>,
    base_name: Option<&str>,
) -> JobResult<QueueName> {
    let base = match base_name {
        Some(name) if !name.is_empty() => name,
        _ => DEFAULT_QUEUE,
    };

    let mut parts = Vec::with_capacity(3);
    for (kind, part) in [("global prefix", global_prefix), ("job prefix", job_prefix)] {
        if let Some(part) = part.filter(|p| !p.is_empty()) {
            validate_part(kind, part)?;
            parts.push(part);
        }
    }
    validate_part("queue name", base)?;
    parts.push(base);

    Ok(QueueName(parts.join(QUEUE_NAME_SEPARATOR)))
}

/// Queue namer bound to one global prefix (the tenant).
#[derive(Debug, Clone, Default)]
pub struct QueueNamer {
    global_prefix: Option<String>,
}

impl QueueNamer {
    /// Create a namer for the given global prefix.
    pub fn new(global_prefix: Option<String>) -> JobResult<Self> {
        if let Some(prefix) = global_prefix.as_deref() {
            validate_part("global prefix", prefix)?;
        }
        Ok(Self {
            global_prefix: global_prefix.filter(|p| !p.is_empty()),
        })
    }

    /// The configured global prefix, if any.
    pub fn global_prefix(&self) -> Option<&str> {
        self.global_prefix.as_deref()
    }

    /// Resolve the backend queue name for a job.
    pub fn name(&self, job_prefix: Option<&str>, base_name: Option<&str>) -> JobResult<QueueName> {
        build_queue_name(self.global_prefix.as_deref(), job_prefix, base_name)
    }

    /// Resolve a caller-supplied queue name.
    ///
    /// Accepts `base`, `jobPrefix:base`, or either form already qualified
    /// with this namer's global prefix. Wildcards are passed through
    /// untouched so the caller can reject them.
    pub fn resolve(&self, queue: &str) -> JobResult<QueueName> {
        if queue.contains('*') {
            return Ok(QueueName(queue.to_string()));
        }

        let mut rest = queue;
        if let Some(prefix) = &self.global_prefix {
            let qualified = format!("{}{}", prefix, QUEUE_NAME_SEPARATOR);
            if let Some(stripped) = queue.strip_prefix(&qualified) {
                rest = stripped;
            }
        }

        match rest.split_once(QUEUE_NAME_SEPARATOR) {
            Some((job_prefix, base)) => self.name(Some(job_prefix), Some(base)),
            None => self.name(None, Some(rest)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_name() {
        assert_eq!(build_queue_name(None, None, None).unwrap().as_str(), "default");
        assert_eq!(build_queue_name(None, None, Some("")).unwrap().as_str(), "default");
    }

    #[test]
    fn test_joins_non_empty_parts() {
        let name = build_queue_name(Some("tenant-a"), Some("billing"), Some("emails")).unwrap();
        assert_eq!(name.as_str(), "tenant-a:billing:emails");

        let name = build_queue_name(Some("tenant-a"), Some(""), Some("emails")).unwrap();
        assert_eq!(name.as_str(), "tenant-a:emails");
    }

    #[test]
    fn test_rejects_separator_inside_part() {
        let err = build_queue_name(Some("a:b"), None, Some("emails")).unwrap_err();
        assert_eq!(err.code(), "INVALID_QUEUE_NAME");

        assert!(build_queue_name(None, None, Some("x:y")).is_err());
        assert!(build_queue_name(None, None, Some("has space")).is_err());
    }

    #[test]
    fn test_tenants_do_not_collide() {
        let a = QueueNamer::new(Some("tenant-a".into())).unwrap();
        let b = QueueNamer::new(Some("tenant-b".into())).unwrap();
        assert_ne!(a.name(None, Some("emails")).unwrap(), b.name(None, Some("emails")).unwrap());
    }

    #[test]
    fn test_enqueue_and_worker_sides_agree() {
        let namer = QueueNamer::new(Some("acme".into())).unwrap();
        let enqueue_side = namer.name(None, Some("emails")).unwrap();
        let worker_side = namer.resolve("emails").unwrap();
        let qualified = namer.resolve("acme:emails").unwrap();
        assert_eq!(enqueue_side, worker_side);
        assert_eq!(enqueue_side, qualified);

        let prefixed = namer.name(Some("billing"), Some("emails")).unwrap();
        assert_eq!(namer.resolve("billing:emails").unwrap(), prefixed);
        assert_eq!(namer.resolve("acme:billing:emails").unwrap(), prefixed);
    }

    #[test]
    fn test_wildcard_is_passed_through() {
        let namer = QueueNamer::default();
        let name = namer.resolve("tenant-*").unwrap();
        assert!(name.is_wildcard());
    }
}
