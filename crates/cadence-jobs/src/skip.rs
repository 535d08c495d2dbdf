//! Fire-time skip rules.
//!
//! The compiler copies rules the backend cannot express into
//! [`ScheduleMetadata`]; this module is the only place that reads them back.
//! A skip turns one firing into a no-op success and leaves the backend's
//! recurrence untouched.

use crate::schedule::{AdvancedSchedulingRules, BusinessHours, ScheduleMetadata};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reason recorded when a time rule skips a firing.
pub const SKIP_REASON_RULES: &str = "Advanced scheduling rules";

/// Reason recorded when a named condition rejects a firing.
pub const SKIP_REASON_CONDITION: &str = "Condition not met";

/// Returns true if any time rule excludes `now`.
///
/// Rules are checked in a fixed order and the first match wins: business
/// hours, weekends, weekday allow-list, skipped dates, then the `between`
/// window. Hour, weekday and date rules use the configured UTC offset; the
/// `between` window compares absolute instants.
pub fn should_skip(rules: &AdvancedSchedulingRules, now: DateTime<Utc>) -> bool {
    let local = now.naive_utc() + Duration::minutes(i64::from(rules.timezone_offset_minutes));

    if rules.only_business_hours {
        let hours = rules.business_hours.unwrap_or_default();
        if !within_hours(hours, local.hour()) {
            return true;
        }
    }

    let weekday = local.weekday();
    if rules.skip_weekends && matches!(weekday, Weekday::Sat | Weekday::Sun) {
        return true;
    }

    if let Some(allowed) = &rules.only_weekdays {
        if !allowed.contains(&weekday) {
            return true;
        }
    }

    if rules.skip_dates.contains(&local.date()) {
        return true;
    }

    if let Some(window) = &rules.between {
        if !window.contains(now) {
            return true;
        }
    }

    false
}

fn within_hours(hours: BusinessHours, hour: u32) -> bool {
    hour >= hours.start && hour < hours.end
}

/// What a condition predicate can see about the firing.
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext<'a> {
    pub job_name: &'a str,
    pub job_id: &'a str,
    pub input: &'a Value,
    pub attempts_made: u32,
    pub now: DateTime<Utc>,
}

/// Server-side predicate referenced by name from a schedule.
pub type ConditionFn = Arc<dyn Fn(&ConditionContext<'_>) -> bool + Send + Sync>;

/// Named condition predicates, shared by every dispatcher.
#[derive(Clone, Default)]
pub struct ConditionRegistry {
    conditions: Arc<RwLock<HashMap<String, ConditionFn>>>,
}

impl std::fmt::Debug for ConditionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.conditions.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("ConditionRegistry").field("conditions", &names).finish()
    }
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a predicate.
    pub fn register<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&ConditionContext<'_>) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(condition = %name, "Registered schedule condition");
        self.conditions.write().insert(name, Arc::new(predicate));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.conditions.read().contains_key(name)
    }

    /// Evaluate a predicate. Unknown names evaluate to false.
    pub fn evaluate(&self, name: &str, ctx: &ConditionContext<'_>) -> bool {
        let predicate = self.conditions.read().get(name).cloned();
        match predicate {
            Some(predicate) => predicate(ctx),
            None => {
                warn!(condition = %name, job_name = %ctx.job_name, "Unknown schedule condition");
                false
            }
        }
    }
}

/// Outcome of a skip evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    Run,
    Skip(&'static str),
}

impl SkipDecision {
    pub fn is_skip(self) -> bool {
        matches!(self, SkipDecision::Skip(_))
    }

    pub fn reason(self) -> Option<&'static str> {
        match self {
            SkipDecision::Run => None,
            SkipDecision::Skip(reason) => Some(reason),
        }
    }
}

/// Evaluates time rules, then the named condition.
#[derive(Debug, Clone, Default)]
pub struct SkipEvaluator {
    conditions: ConditionRegistry,
}

impl SkipEvaluator {
    pub fn new(conditions: ConditionRegistry) -> Self {
        Self { conditions }
    }

    pub fn conditions(&self) -> &ConditionRegistry {
        &self.conditions
    }

    pub fn evaluate(&self, metadata: &ScheduleMetadata, ctx: &ConditionContext<'_>) -> SkipDecision {
        if let Some(rules) = &metadata.advanced_scheduling {
            if should_skip(rules, ctx.now) {
                return SkipDecision::Skip(SKIP_REASON_RULES);
            }
        }

        if metadata.has_condition {
            let passed = metadata
                .condition
                .as_deref()
                .is_some_and(|name| self.conditions.evaluate(name, ctx));
            if !passed {
                return SkipDecision::Skip(SKIP_REASON_CONDITION);
            }
        }

        SkipDecision::Run
    }
}
