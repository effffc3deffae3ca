//! Initial delay calculation for recurring jobs.
//!
//! Turns an optional first-run expression (a clock time or a cron string)
//! into the delay before a job's first invocation. All arithmetic happens on
//! UTC instants.

use chrono::{DateTime, Utc};
use shared::FirstRunTime;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay until the first run of a recurring job.
///
/// Returns `default_delay` when the expression is unset, malformed (logged
/// as a warning), or resolves to a time closer than `default_delay` to
/// `now`, so that a staggered startup is never collapsed into an immediate
/// run.
pub fn get_delay(
    first_run_time: Option<&str>,
    now: DateTime<Utc>,
    default_delay: Duration,
) -> Duration {
    let expression = match first_run_time.map(str::trim) {
        Some(expression) if !expression.is_empty() => expression,
        _ => return default_delay,
    };

    let first_run: FirstRunTime = match expression.parse() {
        Ok(first_run) => first_run,
        Err(e) => {
            warn!(
                expression = expression,
                error = %e,
                default_delay_secs = default_delay.as_secs(),
                "Could not parse first run time, using default delay"
            );
            return default_delay;
        }
    };

    let Some(next) = first_run.next_occurrence(now) else {
        warn!(
            expression = expression,
            "First run time has no upcoming occurrence, using default delay"
        );
        return default_delay;
    };

    let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
    if delay < default_delay {
        debug!(
            expression = expression,
            delay_secs = delay.as_secs(),
            default_delay_secs = default_delay.as_secs(),
            "First run time is too close, using default delay"
        );
        return default_delay;
    }

    delay
}
