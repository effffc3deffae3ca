//! First-run time and cron expression parsing.
//!
//! A first-run time is either a fixed UTC clock time (`HH:mm` or `HHmm`) or a
//! cron expression. Five-field expressions follow the standard Unix layout
//! (`minute hour day-of-month month day-of-week`) where day-of-week `0` and
//! `7` are both Sunday. Six and seven field expressions carry a leading
//! seconds field (and an optional trailing year).

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Weekday names accepted by the underlying cron parser, Sunday first.
const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Errors produced while parsing schedule expressions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("Schedule expression is empty")]
    Empty,

    #[error("Invalid clock time '{0}', expected HH:mm or HHmm")]
    InvalidClockTime(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
}

impl CronError {
    fn invalid_cron(expression: &str, reason: impl Into<String>) -> Self {
        CronError::InvalidCron {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: ::cron::Schedule,
}

impl CronSchedule {
    /// Parse a 5, 6 or 7 field cron expression.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(CronError::Empty);
        }

        let mut fields: Vec<String> = trimmed.split_whitespace().map(str::to_string).collect();
        match fields.len() {
            // Standard Unix layout: prepend seconds, append any-year.
            5 => {
                fields.insert(0, "0".to_string());
                fields.push("*".to_string());
            }
            6 | 7 => {}
            n => {
                return Err(CronError::invalid_cron(
                    trimmed,
                    format!("expected 5, 6 or 7 fields, found {}", n),
                ))
            }
        }

        fields[5] = normalize_day_of_week(&fields[5])
            .map_err(|reason| CronError::invalid_cron(trimmed, reason))?;

        let schedule = ::cron::Schedule::from_str(&fields.join(" "))
            .map_err(|e| CronError::invalid_cron(trimmed, e.to_string()))?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    /// The expression as written by the user.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// When a recurring job should fire for the first time.
#[derive(Debug, Clone)]
pub enum FirstRunTime {
    /// A fixed UTC time of day.
    ClockTime { hour: u32, minute: u32 },
    /// A cron schedule.
    Cron(CronSchedule),
}

impl FirstRunTime {
    /// Next occurrence strictly after `now`.
    ///
    /// A clock time fires today when it is still ahead of `now`, otherwise
    /// tomorrow.
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            FirstRunTime::ClockTime { hour, minute } => {
                let today = now.date_naive().and_hms_opt(*hour, *minute, 0)?;
                let today = Utc.from_utc_datetime(&today);
                if today > now {
                    Some(today)
                } else {
                    Some(today + Duration::days(1))
                }
            }
            FirstRunTime::Cron(schedule) => schedule.next_after(now),
        }
    }
}

impl FromStr for FirstRunTime {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CronError::Empty);
        }

        if trimmed.contains(char::is_whitespace) {
            return CronSchedule::parse(trimmed).map(FirstRunTime::Cron);
        }

        parse_clock_time(trimmed)
            .map(|(hour, minute)| FirstRunTime::ClockTime { hour, minute })
            .ok_or_else(|| CronError::InvalidClockTime(trimmed.to_string()))
    }
}

impl fmt::Display for FirstRunTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirstRunTime::ClockTime { hour, minute } => write!(f, "{:02}:{:02}", hour, minute),
            FirstRunTime::Cron(schedule) => f.write_str(schedule.expression()),
        }
    }
}

fn parse_clock_time(value: &str) -> Option<(u32, u32)> {
    if !value.is_ascii() {
        return None;
    }

    let (hours, minutes) = match value.split_once(':') {
        Some(parts) => parts,
        None if value.len() == 4 => value.split_at(2),
        None => return None,
    };

    if hours.is_empty()
        || hours.len() > 2
        || minutes.len() != 2
        || !hours.chars().chain(minutes.chars()).all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let hour: u32 = hours.parse().ok()?;
    let minute: u32 = minutes.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Rewrite a day-of-week field into weekday names.
///
/// The cron parser numbers weekdays 1-7 starting at Sunday; expressions here
/// use the Unix 0-7 convention, so numeric items are expanded to names.
fn normalize_day_of_week(field: &str) -> Result<String, String> {
    let mut days: Vec<&'static str> = Vec::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| format!("invalid day-of-week step '{}'", step))?;
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = match range {
            "*" | "?" => match step {
                None => return Ok(field.to_string()),
                Some(_) => (0, 6),
            },
            _ => match range.split_once('-') {
                Some((from, to)) => (parse_weekday(from)?, parse_weekday(to)?),
                None => {
                    let day = parse_weekday(range)?;
                    (day, if step.is_some() { 6 } else { day })
                }
            },
        };

        if start > end {
            return Err(format!("day-of-week range '{}' runs backwards", range));
        }

        for day in (start..=end).step_by(step.unwrap_or(1)) {
            let name = WEEKDAY_NAMES[day % 7];
            if !days.contains(&name) {
                days.push(name);
            }
        }
    }

    Ok(days.join(","))
}

/// Parse a weekday as a number (0-7, Sunday is 0 or 7) or a name.
fn parse_weekday(value: &str) -> Result<usize, String> {
    if let Ok(number) = value.parse::<usize>() {
        return if number <= 7 {
            Ok(number)
        } else {
            Err(format!("day-of-week '{}' out of range 0-7", number))
        };
    }

    let prefix = value.get(..3).unwrap_or(value);
    WEEKDAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(prefix))
        .ok_or_else(|| format!("unknown day-of-week '{}'", value))
}
