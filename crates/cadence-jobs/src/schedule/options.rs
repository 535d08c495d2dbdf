//! Backend-primitive options produced by the schedule compiler.

use super::spec::{BusinessHours, TimeWindow};
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Recurrence the backend understands natively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatOptions {
    /// Cron pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<u64>,

    /// Maximum number of repetitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

/// Backoff applied by the backend between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "settings", rename_all = "camelCase")]
pub enum BackoffOptions {
    Exponential {
        multiplier: f64,
        /// Upper bound in milliseconds.
        max: u64,
    },
    Fixed {
        delay: u64,
    },
    Custom {
        delays: Vec<u64>,
    },
}

/// Fire-time rules with no backend equivalent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedSchedulingRules {
    #[serde(default)]
    pub only_business_hours: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_hours: Option<BusinessHours>,

    #[serde(default)]
    pub skip_weekends: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_weekdays: Option<Vec<Weekday>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_dates: Vec<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between: Option<TimeWindow>,

    #[serde(default)]
    pub timezone_offset_minutes: i32,
}

/// Side-channel record travelling with the job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_scheduling: Option<AdvancedSchedulingRules>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Handler timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_factor: Option<f64>,

    #[serde(default)]
    pub has_condition: bool,

    /// Name of the registered condition predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl ScheduleMetadata {
    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Options handed to the backend on enqueue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledScheduleOptions {
    /// Delay before the first run, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Explicit job id; the backend deduplicates on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// Total attempts, filled in from the job definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    #[serde(default)]
    pub remove_on_complete: bool,

    #[serde(default)]
    pub remove_on_fail: bool,

    #[serde(default, skip_serializing_if = "ScheduleMetadata::is_empty")]
    pub metadata: ScheduleMetadata,
}

impl CompiledScheduleOptions {
    /// Configured attempts, defaulting to a single attempt.
    pub fn attempts_or_default(&self) -> u32 {
        self.attempts.unwrap_or(1).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_wire_shape() {
        let backoff = BackoffOptions::Exponential {
            multiplier: 2.0,
            max: 60_000,
        };
        let json = serde_json::to_value(&backoff).unwrap();
        assert_eq!(json["type"], "exponential");
        assert_eq!(json["settings"]["max"], 60_000);

        let fixed: BackoffOptions =
            serde_json::from_str(r#"{"type":"fixed","settings":{"delay":5000}}"#).unwrap();
        assert_eq!(fixed, BackoffOptions::Fixed { delay: 5000 });
    }

    #[test]
    fn test_empty_metadata_is_omitted() {
        let options = CompiledScheduleOptions::default();
        let json = serde_json::to_value(&options).unwrap();
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_metadata_survives_round_trip() {
        let options = CompiledScheduleOptions {
            metadata: ScheduleMetadata {
                advanced_scheduling: Some(AdvancedSchedulingRules {
                    skip_weekends: true,
                    ..AdvancedSchedulingRules::default()
                }),
                webhook_url: Some("http://hooks.local/done".into()),
                ..ScheduleMetadata::default()
            },
            ..CompiledScheduleOptions::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        let back: CompiledScheduleOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn test_attempts_default_to_one() {
        assert_eq!(CompiledScheduleOptions::default().attempts_or_default(), 1);
    }
}
