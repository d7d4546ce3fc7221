//! Cron expression parsing and evaluation for feedrelay.
//!
//! Subscriptions carry five-field cron expressions
//! (minute hour day-of-month month day-of-week, day-of-week 0=Sunday).
//! Expressions are validated when a subscription is created, never at
//! first fire.

use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono_tz::Tz;
use cron::Schedule;

use crate::{RelayError, Result};

/// A validated five-field cron expression.
///
/// The original expression string is kept for display and persistence;
/// the parsed schedule is evaluated against the scheduler's configured
/// timezone.
#[derive(Debug, Clone)]
pub struct CronExpression {
    expression: String,
    schedule: Schedule,
}

impl CronExpression {
    /// Parse and validate a five-field cron expression.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if the expression does not have
    /// exactly five fields or any field is malformed.
    pub fn parse(expr: &str) -> Result<Self> {
        let expression = expr.trim().to_string();
        let normalized = normalize(&expression)?;

        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| RelayError::Validation(format!("invalid cron expression: {e}")))?;

        Ok(Self {
            expression,
            schedule,
        })
    }

    /// The original five-field expression string.
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// The next fire time strictly after the given instant, in the
    /// instant's timezone. `None` for schedules that never fire again.
    pub fn next_after(&self, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(&after).next()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

/// Normalize a five-field expression to the six-field form the `cron`
/// crate expects: a seconds field is prepended and numeric day-of-week
/// values are shifted from 0=Sunday to the crate's 1=Sunday ordinals.
fn normalize(expr: &str) -> Result<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(RelayError::Validation(format!(
            "cron expression must have 5 fields (minute hour day month weekday), got {}",
            fields.len()
        )));
    }

    let dow = remap_day_of_week(fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], dow
    ))
}

/// Shift numeric day-of-week tokens by one (0=Sunday becomes 1=Sunday).
///
/// Handles `*`, single values, ranges `a-b`, steps `expr/n` and
/// comma-separated lists. Non-numeric tokens (names like MON) pass
/// through untouched.
fn remap_day_of_week(field: &str) -> Result<String> {
    let parts: Result<Vec<String>> = field.split(',').map(remap_dow_part).collect();
    Ok(parts?.join(","))
}

fn remap_dow_part(part: &str) -> Result<String> {
    // Step syntax: only the base expression shifts, the step stays.
    if let Some((base, step)) = part.split_once('/') {
        let step: u32 = step
            .parse()
            .map_err(|_| RelayError::Validation(format!("invalid cron step: {part}")))?;
        return Ok(format!("{}/{}", remap_dow_base(base)?, step));
    }
    remap_dow_base(part)
}

fn remap_dow_base(base: &str) -> Result<String> {
    if base == "*" {
        return Ok(base.to_string());
    }
    if let Some((lo, hi)) = base.split_once('-') {
        return Ok(format!("{}-{}", remap_dow_value(lo)?, remap_dow_value(hi)?));
    }
    remap_dow_value(base)
}

fn remap_dow_value(value: &str) -> Result<String> {
    // Names (SUN, MON, ...) are left to the cron parser.
    if value.chars().all(|c| c.is_ascii_digit()) {
        let n: u32 = value
            .parse()
            .map_err(|_| RelayError::Validation(format!("invalid day-of-week: {value}")))?;
        if n > 6 {
            return Err(RelayError::Validation(format!(
                "day-of-week must be 0-6 (0=Sunday), got {n}"
            )));
        }
        Ok((n + 1).to_string())
    } else {
        Ok(value.to_string())
    }
}
