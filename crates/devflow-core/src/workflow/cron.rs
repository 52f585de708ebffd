//! Cron expression parsing and minute matching for scheduled triggers.
//!
//! Schedules are standard 5-field expressions (minute hour day-of-month
//! month day-of-week) with `*`, comma lists, `a-b` ranges and `*/step`.
//! A handful of human-readable aliases are normalized to that form first.
//! Matching is delegated to `croner`, which is fed the 6-field form with a
//! zero seconds column.

use chrono::{DateTime, TimeZone, Timelike};

use super::scheduler::SchedulerError;

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a schedule string to a 5-field cron expression.
///
/// Supported patterns (case-insensitive):
/// - "every minute" / "minutely"  -> "* * * * *"
/// - "every N minutes"            -> "*/N * * * *"
/// - "every N hours"              -> "0 */N * * *"
/// - "every hour" / "hourly"      -> "0 * * * *"
/// - "every day" / "daily"        -> "0 0 * * *"
/// - "every day at HH:MM"         -> "MM HH * * *"
/// - "weekly"                     -> "0 0 * * 0"
///
/// A string with five whitespace-separated fields is returned unchanged.
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() == 5 {
        return Ok(parts.join(" "));
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("* * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 * * *".to_string()),
        "weekly" => return Ok("0 0 * * 0".to_string()),
        _ => {}
    }

    if let Some(rest) = lower.strip_prefix("every ") {
        if let Some(at_part) = rest.strip_prefix("day at ") {
            let invalid = || SchedulerError::InvalidSchedule(input.to_string());
            let (hour, minute) = at_part.split_once(':').ok_or_else(invalid)?;
            let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
            let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
            if hour < 24 && minute < 60 {
                return Ok(format!("{minute} {hour} * * *"));
            }
            return Err(invalid());
        }

        let words: Vec<&str> = rest.split_whitespace().collect();
        if words.len() == 2 {
            let n: u32 = words[0]
                .parse()
                .map_err(|_| SchedulerError::InvalidSchedule(input.to_string()))?;
            if n == 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must be > 0".to_string(),
                ));
            }
            return match words[1].trim_end_matches('s') {
                "minute" => Ok(format!("*/{n} * * * *")),
                "hour" => Ok(format!("0 */{n} * * *")),
                _ => Err(SchedulerError::InvalidSchedule(input.to_string())),
            };
        }
    }

    Err(SchedulerError::InvalidSchedule(format!(
        "expected 5 cron fields or a known alias, got '{trimmed}'"
    )))
}

// ---------------------------------------------------------------------------
// CronSchedule
// ---------------------------------------------------------------------------

/// A parsed schedule that can be tested against wall-clock minutes.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    cron: croner::Cron,
}

impl CronSchedule {
    pub fn parse(input: &str) -> Result<Self, SchedulerError> {
        let expression = normalize_schedule(input)?;
        let cron = format!("0 {expression}")
            .parse::<croner::Cron>()
            .map_err(|e| SchedulerError::InvalidSchedule(format!("'{input}': {e}")))?;
        Ok(Self { expression, cron })
    }

    /// The normalized 5-field expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the minute containing `at` matches the schedule.
    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        let Some(minute) = at.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
            return false;
        };
        self.cron.is_time_matching(&minute).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn every_fifteen_minutes_matches_quarter_hours() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        for hour in [0, 7, 13, 23] {
            for minute in 0..60 {
                let expected = matches!(minute, 0 | 15 | 30 | 45);
                assert_eq!(
                    schedule.matches(&at(2026, 3, 4, hour, minute)),
                    expected,
                    "{hour:02}:{minute:02}"
                );
            }
        }
    }

    #[test]
    fn monday_eight_am_only() {
        let schedule = CronSchedule::parse("0 8 * * 1").unwrap();
        // 2026-03-02 is a Monday.
        assert!(schedule.matches(&at(2026, 3, 2, 8, 0)));
        assert!(!schedule.matches(&at(2026, 3, 2, 8, 1)));
        assert!(!schedule.matches(&at(2026, 3, 2, 9, 0)));
        assert!(!schedule.matches(&at(2026, 3, 3, 8, 0)));
        assert!(!schedule.matches(&at(2026, 3, 8, 8, 0)));
        assert!(schedule.matches(&at(2026, 3, 9, 8, 0)));
    }

    #[test]
    fn lists_and_ranges() {
        let schedule = CronSchedule::parse("5,35 9-17 * * 1-5").unwrap();
        assert!(schedule.matches(&at(2026, 3, 4, 9, 5)));
        assert!(schedule.matches(&at(2026, 3, 4, 17, 35)));
        assert!(!schedule.matches(&at(2026, 3, 4, 18, 5)));
        // Saturday
        assert!(!schedule.matches(&at(2026, 3, 7, 9, 5)));
    }

    #[test]
    fn seconds_within_the_minute_are_ignored() {
        let schedule = CronSchedule::parse("30 12 * * *").unwrap();
        let late = Utc.with_ymd_and_hms(2026, 3, 4, 12, 30, 59).unwrap();
        assert!(schedule.matches(&late));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(CronSchedule::parse("61 * * * *").is_err());
        assert!(CronSchedule::parse("* * *").is_err());
        assert!(CronSchedule::parse("0 0 * * * *").is_err());
        assert!(CronSchedule::parse("whenever").is_err());
    }

    #[test]
    fn normalize_aliases() {
        assert_eq!(normalize_schedule("hourly").unwrap(), "0 * * * *");
        assert_eq!(normalize_schedule("Every 10 minutes").unwrap(), "*/10 * * * *");
        assert_eq!(normalize_schedule("every 2 hours").unwrap(), "0 */2 * * *");
        assert_eq!(normalize_schedule("every day at 09:30").unwrap(), "30 9 * * *");
        assert_eq!(normalize_schedule("  0   8 * * 1 ").unwrap(), "0 8 * * 1");
        assert!(normalize_schedule("every day at 25:00").is_err());
        assert!(normalize_schedule("every 0 minutes").is_err());
        assert!(normalize_schedule("every 5 fortnights").is_err());
    }

    #[test]
    fn alias_schedules_match() {
        let schedule = CronSchedule::parse("every day at 07:45").unwrap();
        assert_eq!(schedule.expression(), "45 7 * * *");
        assert!(schedule.matches(&at(2026, 1, 1, 7, 45)));
        assert!(!schedule.matches(&at(2026, 1, 1, 7, 46)));
    }
}
