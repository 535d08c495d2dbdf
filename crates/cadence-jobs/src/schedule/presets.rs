//! Named schedule presets.

use super::spec::{AdvancedScheduleSpec, RepeatSpec};
use crate::error::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Common cron expressions, crontab field order.
pub mod cron_expressions {
    /// Every minute.
    pub const EVERY_MINUTE: &str = "* * * * *";

    /// Every 5 minutes.
    pub const EVERY_5_MINUTES: &str = "*/5 * * * *";

    /// Every 15 minutes.
    pub const EVERY_15_MINUTES: &str = "*/15 * * * *";

    /// Every 30 minutes.
    pub const EVERY_30_MINUTES: &str = "*/30 * * * *";

    /// Every hour, on the hour.
    pub const HOURLY: &str = "0 * * * *";

    /// Every day at midnight.
    pub const DAILY_MIDNIGHT: &str = "0 0 * * *";

    /// Every day at 9 AM.
    pub const DAILY_9AM: &str = "0 9 * * *";

    /// Monday to Friday at 9 AM.
    pub const WEEKDAYS_9AM: &str = "0 9 * * 1-5";

    /// Every Sunday at midnight.
    pub const WEEKLY_SUNDAY: &str = "0 0 * * 0";

    /// First day of every month at midnight.
    pub const MONTHLY: &str = "0 0 1 * *";
}

/// Predefined scheduling patterns addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchedulePreset {
    EveryMinute,
    #[serde(rename = "every5Minutes")]
    Every5Minutes,
    #[serde(rename = "every15Minutes")]
    Every15Minutes,
    #[serde(rename = "every30Minutes")]
    Every30Minutes,
    Hourly,
    Daily,
    #[serde(rename = "dailyAt9")]
    DailyAt9,
    Weekdays,
    Weekly,
    Monthly,
    /// Hourly, but only inside business hours on weekdays.
    BusinessHours,
}

impl SchedulePreset {
    /// All presets, in declaration order.
    pub const ALL: [SchedulePreset; 11] = [
        SchedulePreset::EveryMinute,
        SchedulePreset::Every5Minutes,
        SchedulePreset::Every15Minutes,
        SchedulePreset::Every30Minutes,
        SchedulePreset::Hourly,
        SchedulePreset::Daily,
        SchedulePreset::DailyAt9,
        SchedulePreset::Weekdays,
        SchedulePreset::Weekly,
        SchedulePreset::Monthly,
        SchedulePreset::BusinessHours,
    ];

    /// The preset's name as accepted by [`FromStr`].
    pub const fn name(self) -> &'static str {
        match self {
            SchedulePreset::EveryMinute => "everyMinute",
            SchedulePreset::Every5Minutes => "every5Minutes",
            SchedulePreset::Every15Minutes => "every15Minutes",
            SchedulePreset::Every30Minutes => "every30Minutes",
            SchedulePreset::Hourly => "hourly",
            SchedulePreset::Daily => "daily",
            SchedulePreset::DailyAt9 => "dailyAt9",
            SchedulePreset::Weekdays => "weekdays",
            SchedulePreset::Weekly => "weekly",
            SchedulePreset::Monthly => "monthly",
            SchedulePreset::BusinessHours => "businessHours",
        }
    }

    /// Cron pattern backing this preset.
    pub const fn cron(self) -> &'static str {
        use cron_expressions as c;
        match self {
            SchedulePreset::EveryMinute => c::EVERY_MINUTE,
            SchedulePreset::Every5Minutes => c::EVERY_5_MINUTES,
            SchedulePreset::Every15Minutes => c::EVERY_15_MINUTES,
            SchedulePreset::Every30Minutes => c::EVERY_30_MINUTES,
            SchedulePreset::Hourly | SchedulePreset::BusinessHours => c::HOURLY,
            SchedulePreset::Daily => c::DAILY_MIDNIGHT,
            SchedulePreset::DailyAt9 => c::DAILY_9AM,
            SchedulePreset::Weekdays => c::WEEKDAYS_9AM,
            SchedulePreset::Weekly => c::WEEKLY_SUNDAY,
            SchedulePreset::Monthly => c::MONTHLY,
        }
    }

    /// Expand into a concrete schedule spec.
    pub fn to_spec(self) -> AdvancedScheduleSpec {
        let repeat = RepeatSpec::cron(self.cron());
        let repeat = match self {
            SchedulePreset::BusinessHours => repeat.only_business_hours(None).skip_weekends(),
            _ => repeat,
        };
        AdvancedScheduleSpec::new().repeat(repeat)
    }
}

impl fmt::Display for SchedulePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedulePreset {
    type Err = JobError;

    fn from_str(s: &str) -> JobResult<Self> {
        SchedulePreset::ALL
            .into_iter()
            .find(|preset| preset.name() == s)
            .ok_or_else(|| JobError::InvalidSchedule(format!("Unknown schedule preset '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::crontab::validate_cron;

    #[test]
    fn test_every_preset_has_a_valid_cron() {
        for preset in SchedulePreset::ALL {
            assert!(validate_cron(preset.cron()).is_ok(), "{preset}");
        }
    }

    #[test]
    fn test_name_round_trips_through_from_str() {
        for preset in SchedulePreset::ALL {
            assert_eq!(preset.name().parse::<SchedulePreset>().unwrap(), preset);
        }
    }

    #[test]
    fn test_unknown_preset_is_invalid_schedule() {
        let err = "fortnightly".parse::<SchedulePreset>().unwrap_err();
        assert_eq!(err.code(), "INVALID_SCHEDULE");
    }

    #[test]
    fn test_business_hours_preset_carries_rules() {
        let spec = SchedulePreset::BusinessHours.to_spec();
        let repeat = spec.repeat.unwrap();
        assert!(repeat.only_business_hours);
        assert!(repeat.skip_weekends);
    }

    #[test]
    fn test_serde_names_match() {
        let json = serde_json::to_string(&SchedulePreset::Every5Minutes).unwrap();
        assert_eq!(json, "\"every5Minutes\"");
        let preset: SchedulePreset = serde_json::from_str("\"dailyAt9\"").unwrap();
        assert_eq!(preset, SchedulePreset::DailyAt9);
    }
}
