//! In-memory `TaskStore`/`ScheduleStore`/`LockStore`/`NotificationBus`
//! implementations for exercising Worker/Scheduler/Elector/Registry
//! callers without a database, kept as its own crate separate from the
//! backend-agnostic coordination core and the real-database backends.
//!
//! These are plain `Mutex`-guarded `Vec`s, not a second implementation of
//! the backends' SQL semantics: `claim_and_fire`/`claim_and_execute` here
//! take the first matching row under lock rather than `FOR UPDATE SKIP
//! LOCKED`, which is correct because a single process holds the only
//! lock. Don't use these stores to test concurrent-claim behavior — use
//! `barrow-postgres`'s `#[sqlx::test]` suite for that.

use std::sync::Mutex;

use async_trait::async_trait;
use barrow_core::bus::{BusSubscription, NotificationBus, Notification};
use barrow_core::lock::AcquireOutcome;
use barrow_core::schedule::{EnqueueSchedule, Schedule};
use barrow_core::store::{FiredSchedule, LockStore, ScheduleExecutor, ScheduleStore, TaskExecutor, TaskStore};
use barrow_core::task::{args_match_subset, EnqueueTask, Task, TaskOutcome, TaskStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use uuid::Uuid;

/// An in-memory `TaskStore`. Not notification-aware: pair with
/// `barrow_core::bus::NoOpBus` or a real bus if a test needs wakeups.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
    next_id: Mutex<i64>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every task, in insertion order — for assertions.
    pub fn all(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }

    fn allocate_id(&self) -> i64 {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        *id
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn enqueue(&self, spec: EnqueueTask) -> anyhow::Result<Task> {
        let task = Task {
            id: self.allocate_id(),
            func: spec.func,
            args: spec.args,
            run_at: spec.run_at.unwrap_or_else(Utc::now),
            status: TaskStatus::Queued,
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        };
        self.tasks.lock().unwrap().push(task.clone());
        Ok(task)
    }

    async fn claim_and_execute(
        &self,
        _worker_id: &str,
        executor: &dyn TaskExecutor,
    ) -> anyhow::Result<Option<Task>> {
        let now = Utc::now();
        let claimed = {
            let mut tasks = self.tasks.lock().unwrap();
            let idx = tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| t.status == TaskStatus::Queued && t.run_at <= now)
                .min_by_key(|(_, t)| (t.run_at, t.id))
                .map(|(idx, _)| idx);
            match idx {
                Some(idx) => Some(tasks[idx].clone()),
                None => None,
            }
        };
        let Some(mut task) = claimed else { return Ok(None) };

        task.started_at = Some(Utc::now());
        let outcome = barrow_core::current::scoped(task.clone(), executor.execute(&task)).await;
        apply_outcome(&mut task, outcome);

        let mut tasks = self.tasks.lock().unwrap();
        if let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id) {
            *slot = task.clone();
        }
        Ok(Some(task))
    }

    async fn run_synchronously(
        &self,
        task_id: i64,
        executor: &dyn TaskExecutor,
    ) -> anyhow::Result<Task> {
        let mut task = {
            let tasks = self.tasks.lock().unwrap();
            tasks
                .iter()
                .find(|t| t.id == task_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("task {task_id} does not exist"))?
        };
        if task.status != TaskStatus::Queued {
            anyhow::bail!("task {task_id} is not QUEUED (status={:?})", task.status);
        }

        task.started_at = Some(Utc::now());
        let outcome = barrow_core::current::scoped(task.clone(), executor.execute(&task)).await;
        apply_outcome(&mut task, outcome);

        let mut tasks = self.tasks.lock().unwrap();
        if let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id) {
            *slot = task.clone();
        }
        Ok(task)
    }

    async fn sweep_old(&self, ttl: ChronoDuration) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - ttl;
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|t| !(t.status.is_terminal() && t.run_at < cutoff));
        Ok((before - tasks.len()) as u64)
    }

    async fn cancel(&self, func: &str, args_match: Value) -> anyhow::Result<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|t| {
            !(t.func == func && t.status == TaskStatus::Queued && args_match_subset(&t.args, &args_match))
        });
        Ok(tasks.len() != before)
    }
}

fn apply_outcome(task: &mut Task, outcome: TaskOutcome) {
    match outcome {
        TaskOutcome::Success(result) => {
            task.status = TaskStatus::Done;
            task.result = result;
            task.error = None;
        }
        TaskOutcome::Failure(message) => {
            task.status = TaskStatus::Failed;
            task.error = Some(message);
            task.result = None;
        }
    }
    task.finished_at = Some(Utc::now());
}

/// An in-memory `ScheduleStore`.
#[derive(Default)]
pub struct InMemoryScheduleStore {
    schedules: Mutex<Vec<Schedule>>,
    tasks: Mutex<Vec<Task>>,
    next_schedule_id: Mutex<i64>,
    next_task_id: Mutex<i64>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_schedules(&self) -> Vec<Schedule> {
        self.schedules.lock().unwrap().clone()
    }

    pub fn materialized_tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn enqueue(&self, spec: EnqueueSchedule) -> anyhow::Result<Schedule> {
        spec.validate()?;
        let mut id_guard = self.next_schedule_id.lock().unwrap();
        *id_guard += 1;
        let schedule = Schedule {
            id: *id_guard,
            name: spec.name,
            func: spec.func,
            args: spec.args,
            is_active: true,
            cron: spec.cron,
            interval_seconds: spec.interval.map(|d| d.num_seconds()),
            next_run_at: spec.next_run_at,
            last_run_at: None,
        };
        self.schedules.lock().unwrap().push(schedule.clone());
        Ok(schedule)
    }

    async fn claim_and_fire(
        &self,
        executor: &dyn ScheduleExecutor,
    ) -> anyhow::Result<Option<FiredSchedule>> {
        let now = Utc::now();
        let mut schedule = {
            let mut schedules = self.schedules.lock().unwrap();
            let idx = schedules
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_active && s.next_run_at.is_none_or(|at| at < now))
                .min_by_key(|(_, s)| (s.next_run_at.is_none(), s.next_run_at, s.id))
                .map(|(idx, _)| idx);
            let Some(idx) = idx else { return Ok(None) };
            schedules.remove(idx)
        };

        let materialized = executor.fire(&mut schedule, now)?;
        self.schedules.lock().unwrap().push(schedule.clone());

        let run_at = materialized.run_at.unwrap_or(now);
        let mut task_id_guard = self.next_task_id.lock().unwrap();
        *task_id_guard += 1;
        let task = Task {
            id: *task_id_guard,
            func: materialized.func,
            args: materialized.args,
            run_at,
            status: TaskStatus::Queued,
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        };
        self.tasks.lock().unwrap().push(task.clone());

        Ok(Some(FiredSchedule { schedule, task }))
    }

    async fn sweep_old(&self, ttl: ChronoDuration) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - ttl;
        let mut schedules = self.schedules.lock().unwrap();
        let before = schedules.len();
        schedules.retain(|s| !(!s.is_active && s.next_run_at.is_some_and(|at| at < cutoff)));
        Ok((before - schedules.len()) as u64)
    }
}

/// Suitable only for single-process tests of the Leader Elector: reuses
/// `materialize_task` indirectly via direct field assignment, mirroring
/// the fencing-token protocol the real backends implement.
#[derive(Default)]
pub struct InMemoryLockStore {
    leases: Mutex<Vec<(String, Option<Uuid>, Option<DateTime<Utc>>)>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(
        &self,
        name: &str,
        me: Uuid,
        lease_ttl: ChronoDuration,
    ) -> anyhow::Result<AcquireOutcome> {
        let now = Utc::now();
        let mut leases = self.leases.lock().unwrap();
        let existing = leases.iter_mut().find(|(n, _, _)| n == name);

        let rotten = match &existing {
            None => true,
            Some((_, _, Some(locked_at))) => now - *locked_at > lease_ttl,
            Some((_, _, None)) => true,
        };

        if !rotten {
            return Ok(AcquireOutcome::HeldByOther);
        }

        match existing {
            Some(entry) => {
                entry.1 = Some(me);
                entry.2 = Some(now);
            }
            None => leases.push((name.to_string(), Some(me), Some(now))),
        }
        Ok(AcquireOutcome::Acquired { locked_at: now })
    }

    async fn confirm(
        &self,
        name: &str,
        me: Uuid,
        locked_at_expected: DateTime<Utc>,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let now = Utc::now();
        let mut leases = self.leases.lock().unwrap();
        let Some(entry) = leases.iter_mut().find(|(n, owner, locked_at)| {
            n == name && *owner == Some(me) && *locked_at == Some(locked_at_expected)
        }) else {
            return Ok(None);
        };
        entry.2 = Some(now);
        Ok(Some(now))
    }

    async fn release(
        &self,
        name: &str,
        me: Uuid,
        locked_at_expected: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut leases = self.leases.lock().unwrap();
        let Some(entry) = leases.iter_mut().find(|(n, owner, locked_at)| {
            n == name && *owner == Some(me) && *locked_at == Some(locked_at_expected)
        }) else {
            return Ok(false);
        };
        entry.1 = None;
        entry.2 = None;
        Ok(true)
    }
}

/// A `NotificationBus` over `tokio::sync::broadcast`, for tests asserting
/// on wakeup behavior without a real LISTEN/NOTIFY connection.
#[derive(Clone)]
pub struct InMemoryBus {
    tx: tokio::sync::broadcast::Sender<Notification>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(256);
        Self { tx }
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationBus for InMemoryBus {
    async fn publish(&self, note: Notification) -> anyhow::Result<()> {
        let _ = self.tx.send(note);
        Ok(())
    }

    fn subscribe(&self) -> BusSubscription {
        BusSubscription::from_receiver(self.tx.subscribe())
    }
}
