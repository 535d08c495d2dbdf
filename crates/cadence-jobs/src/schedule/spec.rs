//! Declarative scheduling specification.
//!
//! An [`AdvancedScheduleSpec`] says *when* and *how* a job should run. It is
//! consumed once by the compiler and never mutated afterwards.

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Working-hours window, `[start, end)` in local hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    /// First hour that counts as business time.
    #[serde(default = "default_business_start")]
    pub start: u32,
    /// First hour that no longer counts as business time.
    #[serde(default = "default_business_end")]
    pub end: u32,
}

fn default_business_start() -> u32 {
    9
}

fn default_business_end() -> u32 {
    17
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start: default_business_start(),
            end: default_business_end(),
        }
    }
}

/// Closed time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Returns true if `instant` lies inside the window, bounds included.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// Recurrence description.
///
/// Exactly one of `cron` or `every` drives the recurrence. The remaining
/// rule fields have no backend equivalent and are evaluated at fire time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatSpec {
    /// Cron pattern (5 or 6 fields).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    /// Fixed interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<u64>,

    /// Maximum number of repetitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<u32>,

    /// Stop repeating after this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,

    #[serde(default)]
    pub only_business_hours: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_hours: Option<BusinessHours>,

    #[serde(default)]
    pub skip_weekends: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_dates: Vec<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_weekdays: Option<Vec<Weekday>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between: Option<TimeWindow>,

    /// Offset applied to `now` before hour/weekday/date rules are checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone_offset_minutes: Option<i32>,
}

impl RepeatSpec {
    /// Repeat on a cron pattern.
    pub fn cron(pattern: impl Into<String>) -> Self {
        Self {
            cron: Some(pattern.into()),
            ..Self::default()
        }
    }

    /// Repeat every `millis` milliseconds.
    pub fn every(millis: u64) -> Self {
        Self {
            every: Some(millis),
            ..Self::default()
        }
    }

    pub fn times(mut self, times: u32) -> Self {
        self.times = Some(times);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Only fire within business hours (defaults to 9-17).
    pub fn only_business_hours(mut self, hours: Option<BusinessHours>) -> Self {
        self.only_business_hours = true;
        self.business_hours = hours;
        self
    }

    pub fn skip_weekends(mut self) -> Self {
        self.skip_weekends = true;
        self
    }

    pub fn skip_dates(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.skip_dates.extend(dates);
        self
    }

    pub fn only_weekdays(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.only_weekdays = Some(days.into_iter().collect());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.between = Some(TimeWindow { start, end });
        self
    }

    pub fn timezone_offset_minutes(mut self, minutes: i32) -> Self {
        self.timezone_offset_minutes = Some(minutes);
        self
    }

    /// Returns true if any fire-time rule is present.
    pub fn has_fire_time_rules(&self) -> bool {
        self.only_business_hours
            || self.skip_weekends
            || !self.skip_dates.is_empty()
            || self.only_weekdays.is_some()
            || self.between.is_some()
    }
}

/// Retry strategy requested by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RetryStrategy {
    /// Exponential backoff, tuned by `backoff_multiplier` and `max_retry_delay`.
    Exponential,
    /// Linear backoff; the backend sees a fixed 5 second step.
    Linear,
    /// Fixed delay between attempts (default 1000 ms).
    Fixed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay: Option<u64>,
    },
    /// Explicit per-attempt delays.
    Custom { delays: Vec<u64> },
}

/// `skipIfRunning`: either a flag (generate an id) or an explicit job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkipIfRunning {
    Flag(bool),
    JobId(String),
}

impl From<bool> for SkipIfRunning {
    fn from(flag: bool) -> Self {
        SkipIfRunning::Flag(flag)
    }
}

impl From<&str> for SkipIfRunning {
    fn from(id: &str) -> Self {
        SkipIfRunning::JobId(id.to_string())
    }
}

/// High-level scheduling specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedScheduleSpec {
    /// Run once at this instant. Mutually exclusive with `delay`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,

    /// Run once after this many milliseconds. Mutually exclusive with `at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_strategy: Option<RetryStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,

    /// Upper bound for exponential backoff, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_delay: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_factor: Option<f64>,

    /// Name of a server-side registered predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if_running: Option<SkipIfRunning>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Base priority before any boost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_boost: Option<i32>,

    /// Handler timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl AdvancedScheduleSpec {
    /// Empty spec: run as soon as possible.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }

    pub fn delay(mut self, millis: u64) -> Self {
        self.delay = Some(millis);
        self
    }

    pub fn repeat(mut self, repeat: RepeatSpec) -> Self {
        self.repeat = Some(repeat);
        self
    }

    pub fn retry(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn max_retry_delay(mut self, millis: u64) -> Self {
        self.max_retry_delay = Some(millis);
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = Some(factor);
        self
    }

    pub fn condition(mut self, name: impl Into<String>) -> Self {
        self.condition = Some(name.into());
        self
    }

    pub fn skip_if_running(mut self, value: impl Into<SkipIfRunning>) -> Self {
        self.skip_if_running = Some(value.into());
        self
    }

    pub fn max_concurrency(mut self, max: u32) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    pub fn webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn priority_boost(mut self, boost: i32) -> Self {
        self.priority_boost = Some(boost);
        self
    }

    pub fn timeout(mut self, millis: u64) -> Self {
        self.timeout = Some(millis);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_deserializes_camel_case() {
        let json = r#"{
            "delay": 5000,
            "repeat": { "cron": "0 9 * * 1-5", "skipWeekends": true, "onlyWeekdays": ["Mon", "Tue"] },
            "retryStrategy": { "type": "fixed", "delay": 250 },
            "skipIfRunning": "nightly-report",
            "priorityBoost": 3
        }"#;
        let spec: AdvancedScheduleSpec = serde_json::from_str(json).unwrap();

        assert_eq!(spec.delay, Some(5000));
        let repeat = spec.repeat.unwrap();
        assert!(repeat.skip_weekends);
        assert_eq!(repeat.only_weekdays, Some(vec![Weekday::Mon, Weekday::Tue]));
        assert_eq!(spec.retry_strategy, Some(RetryStrategy::Fixed { delay: Some(250) }));
        assert_eq!(spec.skip_if_running, Some(SkipIfRunning::JobId("nightly-report".into())));
        assert_eq!(spec.priority_boost, Some(3));
    }

    #[test]
    fn test_skip_if_running_flag() {
        let spec: AdvancedScheduleSpec = serde_json::from_str(r#"{"skipIfRunning": true}"#).unwrap();
        assert_eq!(spec.skip_if_running, Some(SkipIfRunning::Flag(true)));
    }

    #[test]
    fn test_fire_time_rules_detection() {
        assert!(!RepeatSpec::cron("*/5 * * * *").has_fire_time_rules());
        assert!(RepeatSpec::cron("*/5 * * * *").skip_weekends().has_fire_time_rules());
        assert!(RepeatSpec::every(1000).only_business_hours(None).has_fire_time_rules());
    }

    #[test]
    fn test_business_hours_default() {
        let hours: BusinessHours = serde_json::from_str("{}").unwrap();
        assert_eq!(hours, BusinessHours { start: 9, end: 17 });
    }
}
