//! Translation from [`AdvancedScheduleSpec`] to [`CompiledScheduleOptions`].

use super::crontab::validate_cron;
use super::options::{
    AdvancedSchedulingRules, BackoffOptions, CompiledScheduleOptions, RepeatOptions, ScheduleMetadata,
};
use super::presets::SchedulePreset;
use super::spec::{AdvancedScheduleSpec, RepeatSpec, RetryStrategy, SkipIfRunning};
use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default exponential backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default exponential backoff ceiling in milliseconds.
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 60_000;

/// Step used when a linear strategy is requested.
pub const LINEAR_BACKOFF_DELAY_MS: u64 = 5_000;

/// Default delay for the fixed strategy.
pub const DEFAULT_FIXED_DELAY_MS: u64 = 1_000;

/// Compiler input: a full spec or the name of a preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleInput {
    Preset(String),
    Spec(Box<AdvancedScheduleSpec>),
}

impl From<AdvancedScheduleSpec> for ScheduleInput {
    fn from(spec: AdvancedScheduleSpec) -> Self {
        ScheduleInput::Spec(Box::new(spec))
    }
}

impl From<SchedulePreset> for ScheduleInput {
    fn from(preset: SchedulePreset) -> Self {
        ScheduleInput::Preset(preset.name().to_string())
    }
}

impl From<&str> for ScheduleInput {
    fn from(name: &str) -> Self {
        ScheduleInput::Preset(name.to_string())
    }
}

impl ScheduleInput {
    /// Resolve preset names into a concrete spec.
    pub fn resolve(&self) -> JobResult<AdvancedScheduleSpec> {
        match self {
            ScheduleInput::Spec(spec) => Ok((**spec).clone()),
            ScheduleInput::Preset(name) => Ok(name.parse::<SchedulePreset>()?.to_spec()),
        }
    }
}

/// Compile a schedule for `job_name` relative to `now`.
///
/// Fails with `INVALID_SCHEDULE` or `INVALID_CRON`; on failure nothing should
/// reach the backend.
pub fn compile(
    input: &ScheduleInput,
    job_name: &str,
    now: DateTime<Utc>,
) -> JobResult<CompiledScheduleOptions> {
    let spec = input.resolve()?;
    compile_spec(&spec, job_name, now)
}

/// Compile an already resolved spec.
pub fn compile_spec(
    spec: &AdvancedScheduleSpec,
    job_name: &str,
    now: DateTime<Utc>,
) -> JobResult<CompiledScheduleOptions> {
    let mut compiled = CompiledScheduleOptions {
        delay: compile_delay(spec, now)?,
        ..CompiledScheduleOptions::default()
    };
    let mut metadata = ScheduleMetadata::default();

    if let Some(repeat) = &spec.repeat {
        compiled.repeat = Some(compile_repeat(repeat)?);
        if repeat.has_fire_time_rules() {
            metadata.advanced_scheduling = Some(compile_rules(repeat)?);
        }
    }

    compiled.backoff = spec.retry_strategy.as_ref().map(|strategy| compile_backoff(spec, strategy));

    if let Some(jitter) = spec.jitter_factor.filter(|j| *j > 0.0) {
        metadata.jitter_factor = Some(jitter);
    }

    compiled.job_id = match &spec.skip_if_running {
        Some(SkipIfRunning::JobId(id)) if !id.is_empty() => Some(id.clone()),
        Some(SkipIfRunning::Flag(true)) => Some(generate_job_id(job_name, now)),
        _ => None,
    };

    metadata.webhook_url = spec.webhook_url.clone();
    metadata.tags = spec.tags.clone();
    metadata.timeout_ms = spec.timeout;
    metadata.max_concurrency = spec.max_concurrency;
    metadata.has_condition = spec.condition.is_some();
    metadata.condition = spec.condition.clone();

    if spec.priority.is_some() || spec.priority_boost.is_some() {
        compiled.priority = Some(spec.priority.unwrap_or(0) + spec.priority_boost.unwrap_or(0));
    }

    compiled.metadata = metadata;
    Ok(compiled)
}

fn compile_delay(spec: &AdvancedScheduleSpec, now: DateTime<Utc>) -> JobResult<Option<u64>> {
    match (spec.at, spec.delay) {
        (Some(_), Some(_)) => Err(JobError::InvalidSchedule(
            "'at' and 'delay' are mutually exclusive".to_string(),
        )),
        (Some(at), None) => {
            let millis = (at - now).num_milliseconds();
            if millis <= 0 {
                return Err(JobError::InvalidSchedule(format!(
                    "'at' must be in the future (got {}, now {})",
                    at.to_rfc3339(),
                    now.to_rfc3339()
                )));
            }
            Ok(u64::try_from(millis).ok())
        }
        (None, delay) => Ok(delay),
    }
}

fn compile_repeat(repeat: &RepeatSpec) -> JobResult<RepeatOptions> {
    let mut options = RepeatOptions {
        limit: repeat.times,
        end_date: repeat.until,
        ..RepeatOptions::default()
    };

    match (&repeat.cron, repeat.every) {
        (Some(_), Some(_)) => {
            return Err(JobError::InvalidSchedule(
                "repeat accepts either 'cron' or 'every', not both".to_string(),
            ))
        }
        (Some(pattern), None) => {
            validate_cron(pattern)?;
            options.pattern = Some(pattern.clone());
        }
        (None, Some(0)) => {
            return Err(JobError::InvalidSchedule("repeat 'every' must be positive".to_string()))
        }
        (None, Some(every)) => options.every = Some(every),
        (None, None) => {
            return Err(JobError::InvalidSchedule(
                "repeat requires 'cron' or 'every'".to_string(),
            ))
        }
    }

    Ok(options)
}

fn compile_rules(repeat: &RepeatSpec) -> JobResult<AdvancedSchedulingRules> {
    if let Some(hours) = repeat.business_hours {
        if hours.start >= hours.end || hours.end > 24 {
            return Err(JobError::InvalidSchedule(format!(
                "business hours {}-{} are not a valid window",
                hours.start, hours.end
            )));
        }
    }
    if let Some(window) = repeat.between {
        if window.start > window.end {
            return Err(JobError::InvalidSchedule(
                "'between' start must not be after its end".to_string(),
            ));
        }
    }

    Ok(AdvancedSchedulingRules {
        only_business_hours: repeat.only_business_hours,
        business_hours: repeat.business_hours,
        skip_weekends: repeat.skip_weekends,
        only_weekdays: repeat.only_weekdays.clone(),
        skip_dates: repeat.skip_dates.clone(),
        between: repeat.between,
        timezone_offset_minutes: repeat.timezone_offset_minutes.unwrap_or(0),
    })
}

fn compile_backoff(spec: &AdvancedScheduleSpec, strategy: &RetryStrategy) -> BackoffOptions {
    match strategy {
        RetryStrategy::Exponential => BackoffOptions::Exponential {
            multiplier: spec.backoff_multiplier.unwrap_or(DEFAULT_BACKOFF_MULTIPLIER),
            max: spec.max_retry_delay.unwrap_or(DEFAULT_MAX_RETRY_DELAY_MS),
        },
        RetryStrategy::Linear => BackoffOptions::Fixed {
            delay: LINEAR_BACKOFF_DELAY_MS,
        },
        RetryStrategy::Fixed { delay } => BackoffOptions::Fixed {
            delay: delay.unwrap_or(DEFAULT_FIXED_DELAY_MS),
        },
        RetryStrategy::Custom { delays } => BackoffOptions::Custom { delays: delays.clone() },
    }
}

fn generate_job_id(job_name: &str, now: DateTime<Utc>) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", job_name, now.timestamp_millis(), &token[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::spec::RepeatSpec;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
    }

    fn compile_one(spec: AdvancedScheduleSpec) -> JobResult<CompiledScheduleOptions> {
        compile(&spec.into(), "sendEmail", now())
    }

    #[test]
    fn test_at_and_delay_are_exclusive() {
        let spec = AdvancedScheduleSpec::new()
            .at(now() + Duration::minutes(5))
            .delay(1000);
        assert_eq!(compile_one(spec).unwrap_err().code(), "INVALID_SCHEDULE");
    }

    #[test]
    fn test_at_in_past_or_now_is_rejected() {
        for at in [now(), now() - Duration::seconds(1)] {
            let err = compile_one(AdvancedScheduleSpec::new().at(at)).unwrap_err();
            assert_eq!(err.code(), "INVALID_SCHEDULE");
        }
    }

    #[test]
    fn test_at_becomes_exact_delay() {
        let compiled = compile_one(AdvancedScheduleSpec::new().at(now() + Duration::milliseconds(90_500))).unwrap();
        assert_eq!(compiled.delay, Some(90_500));
    }

    #[test]
    fn test_delay_is_passed_through() {
        let compiled = compile_one(AdvancedScheduleSpec::new().delay(250)).unwrap();
        assert_eq!(compiled.delay, Some(250));
    }

    #[test]
    fn test_repeat_maps_to_backend_primitives() {
        let until = now() + Duration::days(7);
        let spec = AdvancedScheduleSpec::new().repeat(RepeatSpec::cron("0 9 * * 1-5").times(10).until(until));
        let compiled = compile_one(spec).unwrap();
        let repeat = compiled.repeat.unwrap();
        assert_eq!(repeat.pattern.as_deref(), Some("0 9 * * 1-5"));
        assert_eq!(repeat.limit, Some(10));
        assert_eq!(repeat.end_date, Some(until));
        assert!(compiled.metadata.advanced_scheduling.is_none());
    }

    #[test]
    fn test_invalid_cron_fails_compilation() {
        let spec = AdvancedScheduleSpec::new().repeat(RepeatSpec::cron("60 * * * *"));
        assert_eq!(compile_one(spec).unwrap_err().code(), "INVALID_CRON");
    }

    #[test]
    fn test_repeat_needs_exactly_one_driver() {
        let both = RepeatSpec {
            cron: Some("* * * * *".into()),
            every: Some(1000),
            ..RepeatSpec::default()
        };
        assert!(compile_one(AdvancedScheduleSpec::new().repeat(both)).is_err());
        assert!(compile_one(AdvancedScheduleSpec::new().repeat(RepeatSpec::default())).is_err());
        assert!(compile_one(AdvancedScheduleSpec::new().repeat(RepeatSpec::every(0))).is_err());
    }

    #[test]
    fn test_rules_go_to_metadata_only() {
        let spec = AdvancedScheduleSpec::new().repeat(
            RepeatSpec::every(60_000)
                .only_business_hours(None)
                .skip_weekends()
                .timezone_offset_minutes(120),
        );
        let compiled = compile_one(spec).unwrap();
        assert_eq!(compiled.repeat.as_ref().unwrap().every, Some(60_000));

        let rules = compiled.metadata.advanced_scheduling.unwrap();
        assert!(rules.only_business_hours);
        assert!(rules.skip_weekends);
        assert_eq!(rules.timezone_offset_minutes, 120);
    }

    #[test]
    fn test_retry_strategy_mapping() {
        let exponential = compile_one(AdvancedScheduleSpec::new().retry(RetryStrategy::Exponential)).unwrap();
        assert_eq!(
            exponential.backoff,
            Some(BackoffOptions::Exponential {
                multiplier: 2.0,
                max: 60_000
            })
        );

        let tuned = compile_one(
            AdvancedScheduleSpec::new()
                .retry(RetryStrategy::Exponential)
                .backoff_multiplier(3.0)
                .max_retry_delay(10_000),
        )
        .unwrap();
        assert_eq!(
            tuned.backoff,
            Some(BackoffOptions::Exponential {
                multiplier: 3.0,
                max: 10_000
            })
        );

        let linear = compile_one(AdvancedScheduleSpec::new().retry(RetryStrategy::Linear)).unwrap();
        assert_eq!(linear.backoff, Some(BackoffOptions::Fixed { delay: 5_000 }));

        let fixed = compile_one(AdvancedScheduleSpec::new().retry(RetryStrategy::Fixed { delay: None })).unwrap();
        assert_eq!(fixed.backoff, Some(BackoffOptions::Fixed { delay: 1_000 }));

        let custom = compile_one(AdvancedScheduleSpec::new().retry(RetryStrategy::Custom {
            delays: vec![100, 200, 400],
        }))
        .unwrap();
        assert_eq!(
            custom.backoff,
            Some(BackoffOptions::Custom {
                delays: vec![100, 200, 400]
            })
        );

        assert!(compile_one(AdvancedScheduleSpec::new()).unwrap().backoff.is_none());
    }

    #[test]
    fn test_jitter_only_when_positive() {
        assert!(compile_one(AdvancedScheduleSpec::new().jitter_factor(0.0))
            .unwrap()
            .metadata
            .jitter_factor
            .is_none());
        assert_eq!(
            compile_one(AdvancedScheduleSpec::new().jitter_factor(0.2))
                .unwrap()
                .metadata
                .jitter_factor,
            Some(0.2)
        );
    }

    #[test]
    fn test_skip_if_running_ids() {
        let fixed = AdvancedScheduleSpec::new().skip_if_running("fixed-id");
        assert_eq!(compile_one(fixed.clone()).unwrap().job_id.as_deref(), Some("fixed-id"));
        assert_eq!(compile_one(fixed).unwrap().job_id.as_deref(), Some("fixed-id"));

        let generated = AdvancedScheduleSpec::new().skip_if_running(true);
        let a = compile_one(generated.clone()).unwrap().job_id.unwrap();
        let b = compile_one(generated).unwrap().job_id.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(&format!("sendEmail-{}-", now().timestamp_millis())));

        let off = AdvancedScheduleSpec::new().skip_if_running(false);
        assert!(compile_one(off).unwrap().job_id.is_none());
    }

    #[test]
    fn test_metadata_fields_are_copied() {
        let spec = AdvancedScheduleSpec::new()
            .webhook_url("http://hooks.local/jobs")
            .tag("billing")
            .timeout(30_000)
            .max_concurrency(2)
            .condition("tenantActive");
        let metadata = compile_one(spec).unwrap().metadata;
        assert_eq!(metadata.webhook_url.as_deref(), Some("http://hooks.local/jobs"));
        assert_eq!(metadata.tags, vec!["billing".to_string()]);
        assert_eq!(metadata.timeout_ms, Some(30_000));
        assert_eq!(metadata.max_concurrency, Some(2));
        assert!(metadata.has_condition);
        assert_eq!(metadata.condition.as_deref(), Some("tenantActive"));
    }

    #[test]
    fn test_priority_boost_is_additive() {
        assert_eq!(compile_one(AdvancedScheduleSpec::new().priority_boost(5)).unwrap().priority, Some(5));
        assert_eq!(
            compile_one(AdvancedScheduleSpec::new().priority(3).priority_boost(5))
                .unwrap()
                .priority,
            Some(8)
        );
        assert!(compile_one(AdvancedScheduleSpec::new()).unwrap().priority.is_none());
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let spec = AdvancedScheduleSpec::new()
            .delay(1_000)
            .repeat(RepeatSpec::cron("*/5 * * * *").skip_weekends())
            .retry(RetryStrategy::Exponential)
            .tag("reports")
            .priority_boost(1);
        assert_eq!(compile_one(spec.clone()).unwrap(), compile_one(spec).unwrap());
    }

    #[test]
    fn test_presets_resolve_by_name() {
        let compiled = compile(&"weekdays".into(), "report", now()).unwrap();
        assert_eq!(compiled.repeat.unwrap().pattern.as_deref(), Some("0 9 * * 1-5"));

        let err = compile(&"never".into(), "report", now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_SCHEDULE");
    }
}
