//! Retry delays derived from compiled backoff options.
//!
//! Backends call [`delay_for_attempt`] after a failed delivery to decide when
//! the next attempt becomes due.

use crate::schedule::BackoffOptions;
use std::time::Duration;

/// Base delay of the first exponential retry, in milliseconds.
pub const EXPONENTIAL_BASE_DELAY_MS: u64 = 1_000;

/// Calculate the delay before retry number `attempt` (1-based).
///
/// Without backoff options a retry is due immediately. A custom list repeats
/// its last entry once exhausted.
pub fn delay_for_attempt(backoff: Option<&BackoffOptions>, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let millis = match backoff {
        None => 0,
        Some(BackoffOptions::Fixed { delay }) => *delay,
        Some(BackoffOptions::Exponential { multiplier, max }) => {
            let exp = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
            let delay = EXPONENTIAL_BASE_DELAY_MS as f64 * multiplier.max(1.0).powi(exp);
            if delay.is_finite() && delay < *max as f64 {
                delay as u64
            } else {
                *max
            }
        }
        Some(BackoffOptions::Custom { delays }) => {
            let index = usize::try_from(attempt - 1).unwrap_or(usize::MAX);
            delays.get(index).or_else(|| delays.last()).copied().unwrap_or(0)
        }
    };

    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_backoff_is_immediate() {
        assert_eq!(delay_for_attempt(None, 1), Duration::ZERO);
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = BackoffOptions::Fixed { delay: 5000 };
        assert_eq!(delay_for_attempt(Some(&backoff), 1), Duration::from_millis(5000));
        assert_eq!(delay_for_attempt(Some(&backoff), 4), Duration::from_millis(5000));
    }

    #[test]
    fn test_exponential_backoff() {
        let backoff = BackoffOptions::Exponential {
            multiplier: 2.0,
            max: 60_000,
        };

        // 1st retry: 1000ms
        // 2nd retry: 2000ms
        // 3rd retry: 4000ms
        assert_eq!(delay_for_attempt(Some(&backoff), 1), Duration::from_millis(1000));
        assert_eq!(delay_for_attempt(Some(&backoff), 2), Duration::from_millis(2000));
        assert_eq!(delay_for_attempt(Some(&backoff), 3), Duration::from_millis(4000));
    }

    #[test]
    fn test_max_delay_cap() {
        let backoff = BackoffOptions::Exponential {
            multiplier: 3.0,
            max: 10_000,
        };
        assert_eq!(delay_for_attempt(Some(&backoff), 10), Duration::from_millis(10_000));
        assert_eq!(delay_for_attempt(Some(&backoff), u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_custom_delays_repeat_last() {
        let backoff = BackoffOptions::Custom {
            delays: vec![100, 500],
        };
        assert_eq!(delay_for_attempt(Some(&backoff), 1), Duration::from_millis(100));
        assert_eq!(delay_for_attempt(Some(&backoff), 2), Duration::from_millis(500));
        assert_eq!(delay_for_attempt(Some(&backoff), 3), Duration::from_millis(500));

        let empty = BackoffOptions::Custom { delays: vec![] };
        assert_eq!(delay_for_attempt(Some(&empty), 1), Duration::ZERO);
    }
}
