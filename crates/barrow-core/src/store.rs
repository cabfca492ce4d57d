//! Store traits: the backend-agnostic seam between the Worker/Scheduler/
//! Elector loops and a concrete PostgreSQL or SQLite implementation. No
//! backend-specific SQL leaks across this boundary.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;

use crate::lock::AcquireOutcome;
use crate::schedule::{EnqueueSchedule, Schedule};
use crate::task::{EnqueueTask, Task, TaskOutcome};

/// Invokes a claimed task's registered function. Implementations are
/// handed to a `TaskStore` so the invocation — and the
/// `pre_task_execute`/`post_task_execute` hooks around it — runs
/// synchronously on the thread holding the claim's transaction.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> TaskOutcome;
}

/// CRUD plus the atomic "claim next" over Task rows.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a `QUEUED` row. `run_at: None` defaults to "now". After
    /// commit, implementations publish a notification iff
    /// `bus::should_notify_task` says the new row is immediately eligible.
    async fn enqueue(&self, spec: EnqueueTask) -> anyhow::Result<Task>;

    /// `SELECT ... FOR UPDATE SKIP LOCKED LIMIT 1` over due, `QUEUED`
    /// rows ordered by `(run_at, id)`, then — in the same transaction —
    /// invokes `executor` and records the outcome (`Finish`). Returns
    /// `None` when nothing is claimable; the caller's drain loop stops.
    async fn claim_and_execute(
        &self,
        worker_id: &str,
        executor: &dyn TaskExecutor,
    ) -> anyhow::Result<Option<Task>>;

    /// Locks and executes one specific, already-`QUEUED` row in the
    /// caller's transaction. Used by the synchronous-execution mode that
    /// runs a task inline as part of `enqueue` instead of waiting for a
    /// worker to pick it up. Rejects a task that is no longer `QUEUED`.
    async fn run_synchronously(
        &self,
        task_id: i64,
        executor: &dyn TaskExecutor,
    ) -> anyhow::Result<Task>;

    /// Deletes terminal rows older than `ttl`.
    async fn sweep_old(&self, ttl: ChronoDuration) -> anyhow::Result<u64>;

    /// Deletes `QUEUED` rows matching `func` and whose `args` is a
    /// superset of `args_match` (see `task::args_match_subset`). Returns
    /// whether any row was removed.
    async fn cancel(&self, func: &str, args_match: Value) -> anyhow::Result<bool>;
}

/// Mutates a due schedule in place (advancing `next_run_at`/`last_run_at`/
/// `is_active`) and returns the `Task` spec that should be materialized
/// for it. Pure, synchronous logic — no IO of its own; the backend
/// performs the actual INSERT/UPDATE from the returned values inside the
/// same transaction that claimed the row.
pub trait ScheduleExecutor: Send + Sync {
    fn fire(&self, schedule: &mut Schedule, now: DateTime<Utc>) -> anyhow::Result<EnqueueTask>;
}

/// CRUD plus the atomic "claim next due" over Schedule rows.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn enqueue(&self, spec: EnqueueSchedule) -> anyhow::Result<Schedule>;

    /// Claims one due, active schedule (`next_run_at IS NULL OR
    /// next_run_at < now()`) with `FOR UPDATE SKIP LOCKED`, calls
    /// `executor`, persists both the new schedule row and the
    /// materialized task row in the same transaction, and returns both.
    /// `None` means nothing is due.
    async fn claim_and_fire(
        &self,
        executor: &dyn ScheduleExecutor,
    ) -> anyhow::Result<Option<FiredSchedule>>;

    async fn sweep_old(&self, ttl: ChronoDuration) -> anyhow::Result<u64>;
}

/// The result of one `claim_and_fire` call.
#[derive(Debug, Clone)]
pub struct FiredSchedule {
    pub schedule: Schedule,
    pub task: Task,
}

/// Atomic acquire/confirm/release of a named lease row.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Inserts the lease if absent, or steals it if rotten
    /// (`locked_at < now - lease_ttl`). `me` both creates and claims.
    async fn try_acquire(
        &self,
        name: &str,
        me: uuid::Uuid,
        lease_ttl: ChronoDuration,
    ) -> anyhow::Result<AcquireOutcome>;

    /// The heartbeat: `UPDATE ... SET locked_at=now() WHERE name=? AND
    /// owner=? AND locked_at=?`. `locked_at_expected` is the fencing
    /// token from the last successful acquire/confirm. Returns the new
    /// `locked_at` iff exactly one row matched.
    async fn confirm(
        &self,
        name: &str,
        me: uuid::Uuid,
        locked_at_expected: DateTime<Utc>,
    ) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Clears `owner`/`locked_at` iff the fencing token still matches.
    /// Returns whether the release actually applied.
    async fn release(
        &self,
        name: &str,
        me: uuid::Uuid,
        locked_at_expected: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}
