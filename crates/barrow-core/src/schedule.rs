//! The `Schedule` data model: a recurring or one-shot trigger
//! that materializes `Task` rows.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BarrowError;

/// Exactly one firing policy applies per schedule: `cron` XOR `interval`
/// XOR one-shot (neither set, `next_run_at` carries the single instant).
#[derive(Debug, Clone, PartialEq)]
pub enum FiringPolicy {
    Cron(String),
    Interval(ChronoDuration),
    OneShot,
}

/// A persisted recurring or one-shot trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: Option<String>,
    pub func: String,
    pub args: Option<Value>,
    pub is_active: bool,
    pub cron: Option<String>,
    /// Interval in whole seconds; `chrono::Duration` carries no Serde impl,
    /// so the wire/row representation is a plain integer.
    pub interval_seconds: Option<i64>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Determines the firing policy, or a `ScheduleMisconfiguration` if
    /// both `cron` and an interval are set, or neither is set without a
    /// `next_run_at` to fall back on as a one-shot.
    pub fn firing_policy(&self) -> Result<FiringPolicy, BarrowError> {
        match (&self.cron, self.interval_seconds) {
            (Some(_), Some(_)) => Err(BarrowError::ScheduleMisconfiguration {
                schedule_id: self.id,
                reason: "cron and interval are mutually exclusive".into(),
            }),
            (Some(cron), None) => Ok(FiringPolicy::Cron(cron.clone())),
            (None, Some(secs)) => Ok(FiringPolicy::Interval(ChronoDuration::seconds(secs))),
            (None, None) => Ok(FiringPolicy::OneShot),
        }
    }
}

/// Parameters for `ScheduleStore::enqueue`.
#[derive(Debug, Clone)]
pub struct EnqueueSchedule {
    pub name: Option<String>,
    pub func: String,
    pub args: Option<Value>,
    pub cron: Option<String>,
    pub interval: Option<ChronoDuration>,
    /// Required for a one-shot (neither `cron` nor `interval` set);
    /// optional otherwise, where `None` means "compute on first visit".
    pub next_run_at: Option<DateTime<Utc>>,
}

impl EnqueueSchedule {
    pub fn cron(func: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            name: None,
            func: func.into(),
            args: None,
            cron: Some(expr.into()),
            interval: None,
            next_run_at: None,
        }
    }

    pub fn interval(func: impl Into<String>, every: ChronoDuration) -> Self {
        Self {
            name: None,
            func: func.into(),
            args: None,
            cron: None,
            interval: Some(every),
            next_run_at: None,
        }
    }

    pub fn one_shot(func: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            name: None,
            func: func.into(),
            args: None,
            cron: None,
            interval: None,
            next_run_at: Some(at),
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Rejects a spec that sets both `cron` and `interval`, or sets
    /// neither without a `next_run_at`.
    pub fn validate(&self) -> Result<(), BarrowError> {
        match (&self.cron, &self.interval, self.next_run_at) {
            (Some(_), Some(_), _) => Err(BarrowError::ConfigError(
                "a schedule cannot set both cron and interval".into(),
            )),
            (None, None, None) => Err(BarrowError::ConfigError(
                "a one-shot schedule (neither cron nor interval) requires next_run_at".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// The immediate result of materializing a due schedule: the `Task` spec
/// that should be enqueued to mirror it.
///
/// `run_at` is set to the schedule's `next_run_at` (the instant it was due
/// at), not to "now" — a late-firing scheduler still enqueues a task whose
/// recorded eligibility instant matches what was promised, keeping latency
/// measurements meaningful.
pub fn materialize_task(schedule: &Schedule) -> crate::task::EnqueueTask {
    crate::task::EnqueueTask {
        func: schedule.func.clone(),
        args: schedule.args.clone(),
        run_at: schedule.next_run_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(id: i64) -> Schedule {
        Schedule {
            id,
            name: None,
            func: "m.f".into(),
            args: None,
            is_active: true,
            cron: None,
            interval_seconds: None,
            next_run_at: None,
            last_run_at: None,
        }
    }

    #[test]
    fn cron_xor_interval_conflict_is_misconfiguration() {
        let mut s = base(1);
        s.cron = Some("* * * * *".into());
        s.interval_seconds = Some(5);
        let err = s.firing_policy().unwrap_err();
        assert!(matches!(err, BarrowError::ScheduleMisconfiguration { .. }));
    }

    #[test]
    fn neither_cron_nor_interval_is_one_shot() {
        let s = base(1);
        assert_eq!(s.firing_policy().unwrap(), FiringPolicy::OneShot);
    }

    #[test]
    fn materialize_uses_next_run_at_not_now() {
        let mut s = base(1);
        let when = Utc::now() + ChronoDuration::minutes(5);
        s.next_run_at = Some(when);
        let spec = materialize_task(&s);
        assert_eq!(spec.run_at, Some(when));
    }
}
