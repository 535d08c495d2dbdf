//! Declarative schedules and their compilation to backend options.

pub mod compiler;
pub mod crontab;
pub mod options;
pub mod presets;
pub mod spec;

pub use compiler::{compile, compile_spec, ScheduleInput};
pub use crontab::{next_occurrence, validate_cron};
pub use options::{
    AdvancedSchedulingRules, BackoffOptions, CompiledScheduleOptions, RepeatOptions, ScheduleMetadata,
};
pub use presets::{cron_expressions, SchedulePreset};
pub use spec::{AdvancedScheduleSpec, BusinessHours, RepeatSpec, RetryStrategy, SkipIfRunning, TimeWindow};
