//! Error taxonomy for the coordination core.
//!
//! Store implementations speak `anyhow::Result` at their trait boundary.
//! `BarrowError` is the `thiserror`-derived type library code constructs
//! directly and matches on by value — at a validation boundary
//! (`ElectorConfig::validate`, `EnqueueSchedule::validate`) or a lookup
//! (`Registry::resolve`) — wherever a caller needs to react to *which*
//! kind of misconfiguration happened, not just that one did.
//!
//! The coordination core's design names three further failure kinds whose
//! handling needs no distinguishable error type at all, since nothing
//! downstream ever needs to recover one after the fact: a task's registered
//! function raising is recorded straight onto the row as
//! `TaskOutcome::Failure(message)` and never escapes the Worker loop; a
//! transient database error (connection drop, serialization failure) rolls
//! back the claim transaction and is simply the `anyhow::Error` that
//! `claim_and_execute`/`claim_and_fire` propagate with `?`, which the
//! Worker/Scheduler loop logs and retries on the next tick; and a lease
//! heartbeat affecting zero rows is the `Ok(None)` the `LeaderElector` loop
//! matches directly to demote to `Follower` and emit the transition.

use thiserror::Error;

/// Failure kinds the coordination core needs to construct and match on by
/// value, rather than just log and move on.
#[derive(Debug, Error)]
pub enum BarrowError {
    /// A schedule has no usable firing policy: cron fails to parse,
    /// neither cron nor interval is set with no `next_run_at`, or both
    /// are set at once.
    #[error("schedule {schedule_id} is misconfigured: {reason}")]
    ScheduleMisconfiguration { schedule_id: i64, reason: String },

    /// An option was invalid at startup. Fatal: the process must exit
    /// before any loop thread starts.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// `func` could not be resolved against the registry. Treated as a
    /// task failure by the Worker (the task still moves to `FAILED`).
    #[error("no registered task function named {0:?}")]
    ResolutionError(String),
}
