//! Clock & cron evaluator: compute the next firing instant
//! from a cron expression, always in UTC.
//!
//! `cron` expects `sec min hour dom month dow [year]` (6 or 7 fields).
//! Schedules are authored against the conventional 5-field Unix form
//! (`min hour dom month dow`) with an optional 6th field as *trailing*
//! seconds, not leading, matching the convention most cron-expression
//! authors already know. We normalize both shapes into the 6-field form
//! `cron` wants before parsing.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronExpr;

use crate::error::BarrowError;

/// Rewrites a 5- or 6-field expression into `cron`'s expected
/// `sec min hour dom month dow` form.
fn normalize(expr: &str) -> Result<String, String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 => {
            // 6-field input: the extra field is trailing seconds.
            let (rest, seconds) = fields.split_at(5);
            Ok(format!("{} {}", seconds[0], rest.join(" ")))
        }
        n => Err(format!(
            "expected 5 or 6 whitespace-separated fields, found {n}"
        )),
    }
}

/// Parses `expr` and returns the smallest instant strictly greater than
/// `after`, or a `ScheduleMisconfiguration` if the expression is invalid.
pub fn next_after(
    schedule_id: i64,
    expr: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, BarrowError> {
    let misconfigured = |reason: String| BarrowError::ScheduleMisconfiguration {
        schedule_id,
        reason,
    };

    let normalized = normalize(expr).map_err(misconfigured)?;
    let parsed = CronExpr::from_str(&normalized)
        .map_err(|e| misconfigured(format!("invalid cron expression {expr:?}: {e}")))?;

    parsed
        .after(&after)
        .next()
        .ok_or_else(|| misconfigured(format!("cron expression {expr:?} never fires again")))
}
