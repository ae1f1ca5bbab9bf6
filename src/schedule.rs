//! Cron schedule evaluation
//!
//! Backup schedules are written in the standard 5-field cron form (or as a
//! descriptor such as `@daily`). The `cron` crate consumes seconds-first
//! expressions, so 5-field expressions are normalized by prepending a zero
//! seconds field before parsing.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Error, Result};

/// Parse a 5-field cron expression or descriptor
pub fn parse(expr: &str) -> Result<Schedule> {
    let trimmed = expr.trim();
    let normalized = if trimmed.starts_with('@') || trimmed.split_whitespace().count() != 5 {
        trimmed.to_string()
    } else {
        format!("0 {trimmed}")
    };

    Schedule::from_str(&normalized)
        .map_err(|e| Error::validation(format!("invalid cron schedule '{expr}': {e}")))
}

/// First fire instant strictly after the reference time
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = parse(expr)?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| Error::validation(format!("cron schedule '{expr}' has no future fire time")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expressions_parse() {
        for expr in ["0 2 * * *", "*/5 * * * *", "0 */6 * * *", "* * * * *"] {
            assert!(parse(expr).is_ok(), "expected '{}' to parse", expr);
        }
    }

    #[test]
    fn descriptors_parse() {
        for expr in ["@hourly", "@daily", "@weekly", "@monthly", "@yearly"] {
            assert!(parse(expr).is_ok(), "expected '{}' to parse", expr);
        }
    }

    #[test]
    fn invalid_expressions_error_with_offending_string() {
        for expr in ["not-a-cron", "61 * * * *", "* * *"] {
            let err = parse(expr).unwrap_err();
            assert!(
                err.to_string().contains(expr),
                "error for '{}' should name the schedule, got: {}",
                expr,
                err
            );
        }
    }

    #[test]
    fn next_fire_is_strictly_in_the_future() {
        let now = Utc.with_ymd_and_hms(2025, 1, 20, 12, 30, 15).unwrap();
        for expr in ["0 2 * * *", "*/5 * * * *", "@hourly"] {
            let next = next_fire(expr, now).unwrap();
            assert!(next > now, "'{}' fired at {} which is not after {}", expr, next, now);
        }
    }

    #[test]
    fn daily_schedule_fires_at_two_am() {
        let now = Utc.with_ymd_and_hms(2025, 1, 20, 12, 0, 0).unwrap();
        let next = next_fire("0 2 * * *", now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 21, 2, 0, 0).unwrap());
    }

    #[test]
    fn consecutive_fires_advance_by_one_interval() {
        let now = Utc.with_ymd_and_hms(2025, 1, 20, 12, 0, 0).unwrap();
        let first = next_fire("0 2 * * *", now).unwrap();
        let second = next_fire("0 2 * * *", first).unwrap();
        assert_eq!(second - first, chrono::Duration::days(1));
    }

    #[test]
    fn fire_exactly_at_schedule_time_moves_to_next_interval() {
        let at_fire = Utc.with_ymd_and_hms(2025, 1, 21, 2, 0, 0).unwrap();
        let next = next_fire("0 2 * * *", at_fire).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 22, 2, 0, 0).unwrap());
    }
}
