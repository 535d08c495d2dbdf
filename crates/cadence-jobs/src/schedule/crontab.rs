//! Cron expression validation and evaluation.
//!
//! Patterns are accepted in the crontab form (`min hour dom month dow`) or
//! with a leading seconds field. Validation is purely lexical; evaluation
//! goes through the `cron` crate, which needs seconds-first fields and
//! named weekdays.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

const WEEKDAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

fn invalid(expression: &str, field: usize, reason: impl Into<String>) -> JobError {
    JobError::InvalidCron {
        expression: expression.to_string(),
        field,
        reason: reason.into(),
    }
}

/// Validate a 5 or 6 field cron expression.
///
/// Every field must consist of digits and `* / , -`. Bare integer minute and
/// hour fields are range-checked.
pub fn validate_cron(expression: &str) -> JobResult<()> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let offset = match fields.len() {
        5 => 0,
        6 => 1,
        n => {
            return Err(invalid(
                expression,
                n.min(6),
                format!("expected 5 or 6 fields, found {}", n),
            ))
        }
    };

    for (index, field) in fields.iter().enumerate() {
        if !field
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | ',' | '-'))
        {
            return Err(invalid(expression, index, format!("unexpected characters in '{}'", field)));
        }

        if !field.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let value: u32 = field
            .parse()
            .map_err(|_| invalid(expression, index, format!("'{}' is not a number", field)))?;

        let (label, max) = match index.checked_sub(offset) {
            None => ("second", 59),
            Some(0) => ("minute", 59),
            Some(1) => ("hour", 23),
            Some(_) => continue,
        };
        if value > max {
            return Err(invalid(
                expression,
                index,
                format!("{} {} out of range 0-{}", label, value, max),
            ));
        }
    }

    Ok(())
}

fn translate_weekday(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut digits = String::new();
    let mut after_step = false;

    let flush = |digits: &mut String, out: &mut String, after_step: bool| {
        if digits.is_empty() {
            return;
        }
        match digits.parse::<usize>() {
            Ok(day) if !after_step && day < WEEKDAY_NAMES.len() => out.push_str(WEEKDAY_NAMES[day]),
            _ => out.push_str(digits),
        }
        digits.clear();
    };

    for c in field.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        flush(&mut digits, &mut out, after_step);
        after_step = c == '/';
        out.push(c);
    }
    flush(&mut digits, &mut out, after_step);
    out
}

/// Convert a validated pattern into the seconds-first, named-weekday form
/// understood by the `cron` crate.
pub fn normalize_cron(expression: &str) -> String {
    let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
    if fields.len() == 5 {
        fields.insert(0, "0".to_string());
    }
    if let Some(dow) = fields.get_mut(5) {
        *dow = translate_weekday(dow);
    }
    fields.join(" ")
}

/// Parse a pattern into a [`Schedule`].
pub fn parse_schedule(expression: &str) -> JobResult<Schedule> {
    validate_cron(expression)?;
    Schedule::from_str(&normalize_cron(expression)).map_err(|e| invalid(expression, 0, e.to_string()))
}

/// Next fire time strictly after `after`.
pub fn next_occurrence(expression: &str, after: DateTime<Utc>) -> JobResult<Option<DateTime<Utc>>> {
    Ok(parse_schedule(expression)?.after(&after).next())
}
