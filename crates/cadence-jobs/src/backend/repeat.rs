//! Repeat timing shared by the bundled backends.

use super::JobRecord;
use crate::error::JobResult;
use crate::schedule::{next_occurrence, CompiledScheduleOptions};
use chrono::{DateTime, Duration, Utc};

fn millis(value: u64) -> Duration {
    Duration::milliseconds(i64::try_from(value).unwrap_or(i64::MAX / 2))
}

/// First delivery instant for a freshly enqueued job.
///
/// An explicit delay wins. Cron repeats otherwise wait for their next
/// occurrence; everything else is due immediately.
pub fn initial_run_at(options: &CompiledScheduleOptions, now: DateTime<Utc>) -> JobResult<DateTime<Utc>> {
    if let Some(delay) = options.delay.filter(|d| *d > 0) {
        return Ok(now + millis(delay));
    }
    if let Some(pattern) = options.repeat.as_ref().and_then(|r| r.pattern.as_deref()) {
        if let Some(next) = next_occurrence(pattern, now)? {
            return Ok(next);
        }
    }
    Ok(now)
}

/// Delivery instant of the repetition following `record`, if any remains.
pub fn next_run_at(record: &JobRecord) -> JobResult<Option<DateTime<Utc>>> {
    let Some(repeat) = &record.options.repeat else {
        return Ok(None);
    };

    if let Some(limit) = repeat.limit {
        if record.repeat_count + 1 >= limit {
            return Ok(None);
        }
    }

    let next = match (&repeat.pattern, repeat.every) {
        (Some(pattern), _) => next_occurrence(pattern, record.run_at)?,
        (None, Some(every)) if every > 0 => Some(record.run_at + millis(every)),
        _ => None,
    };

    Ok(next.filter(|at| repeat.end_date.map_or(true, |end| *at <= end)))
}

/// Record for the next repetition, scheduled at `run_at`.
pub fn next_record(record: &JobRecord, id: String, run_at: DateTime<Utc>, now: DateTime<Utc>) -> JobRecord {
    let mut options = record.options.clone();
    options.delay = None;
    let mut next = JobRecord::new(
        id,
        &record.queue,
        &record.name,
        record.payload.clone(),
        options,
        now,
    );
    next.run_at = run_at;
    next.state = if run_at > now {
        super::JobState::Delayed
    } else {
        super::JobState::Waiting
    };
    next.repeat_count = record.repeat_count + 1;
    next
}

/// Id for a repetition: the explicit id or the job name, plus the fire time.
pub fn repeat_job_id(record: &JobRecord, run_at: DateTime<Utc>) -> String {
    match record.options.job_id.as_deref() {
        Some(id) => format!("{}:rpt:{}", id, run_at.timestamp_millis()),
        None => format!("repeat:{}:rpt:{}", record.name, run_at.timestamp_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_name::QueueNamer;
    use crate::schedule::RepeatOptions;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};
    use serde_json::Value;

    fn record(repeat: RepeatOptions, at: DateTime<Utc>) -> JobRecord {
        let queue = QueueNamer::default().name(None, None).unwrap();
        let mut record = JobRecord::new(
            "1",
            &queue,
            "report",
            Value::Null,
            CompiledScheduleOptions {
                repeat: Some(repeat),
                ..CompiledScheduleOptions::default()
            },
            at,
        );
        record.run_at = at;
        record
    }

    #[test]
    fn test_cron_first_run_waits_for_occurrence() {
        let saturday = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let options = CompiledScheduleOptions {
            repeat: Some(RepeatOptions {
                pattern: Some("0 9 * * 1-5".into()),
                ..RepeatOptions::default()
            }),
            ..CompiledScheduleOptions::default()
        };
        let first = initial_run_at(&options, saturday).unwrap();
        assert_eq!(first.weekday(), Weekday::Mon);
        assert_eq!(first.hour(), 9);
    }

    #[test]
    fn test_delay_wins_over_pattern() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let options = CompiledScheduleOptions {
            delay: Some(1000),
            ..CompiledScheduleOptions::default()
        };
        assert_eq!(initial_run_at(&options, now).unwrap(), now + Duration::seconds(1));
    }

    #[test]
    fn test_every_advances_from_previous_run() {
        let at = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let rec = record(
            RepeatOptions {
                every: Some(60_000),
                ..RepeatOptions::default()
            },
            at,
        );
        assert_eq!(next_run_at(&rec).unwrap(), Some(at + Duration::minutes(1)));
    }

    #[test]
    fn test_limit_and_end_date_stop_the_chain() {
        let at = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let mut rec = record(
            RepeatOptions {
                every: Some(60_000),
                limit: Some(2),
                ..RepeatOptions::default()
            },
            at,
        );
        assert!(next_run_at(&rec).unwrap().is_some());
        rec.repeat_count = 1;
        assert!(next_run_at(&rec).unwrap().is_none());

        let rec = record(
            RepeatOptions {
                every: Some(60_000),
                end_date: Some(at + Duration::seconds(30)),
                ..RepeatOptions::default()
            },
            at,
        );
        assert!(next_run_at(&rec).unwrap().is_none());
    }

    #[test]
    fn test_repeat_ids_carry_fire_time() {
        let at = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let mut rec = record(
            RepeatOptions {
                every: Some(1000),
                ..RepeatOptions::default()
            },
            at,
        );
        assert_eq!(repeat_job_id(&rec, at), format!("repeat:report:rpt:{}", at.timestamp_millis()));

        rec.options.job_id = Some("nightly".into());
        assert_eq!(repeat_job_id(&rec, at), format!("nightly:rpt:{}", at.timestamp_millis()));
    }

    #[test]
    fn test_next_record_is_chained() {
        let at = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let rec = record(
            RepeatOptions {
                every: Some(1000),
                ..RepeatOptions::default()
            },
            at,
        );
        let next_at = at + Duration::seconds(1);
        let next = next_record(&rec, "2".into(), next_at, at);
        assert_eq!(next.repeat_count, 1);
        assert_eq!(next.run_at, next_at);
        assert_eq!(next.state, crate::backend::JobState::Delayed);
        assert_eq!(next.queue, rec.queue);
    }
}
