//! `TaskStore` over PostgreSQL.

use std::sync::Arc;

use async_trait::async_trait;
use barrow_core::bus::{should_notify_task, NotificationBus, Notification, NotifyEvent};
use barrow_core::store::{TaskExecutor, TaskStore};
use barrow_core::task::{args_match_subset, EnqueueTask, Task, TaskOutcome, TaskStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::TASK_MODEL;

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "QUEUED",
        TaskStatus::Done => "DONE",
        TaskStatus::Failed => "FAILED",
    }
}

fn parse_status(raw: &str) -> anyhow::Result<TaskStatus> {
    match raw {
        "QUEUED" => Ok(TaskStatus::Queued),
        "DONE" => Ok(TaskStatus::Done),
        "FAILED" => Ok(TaskStatus::Failed),
        other => anyhow::bail!("unrecognized task status {other:?} in barrow_task row"),
    }
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<Task> {
    Ok(Task {
        id: row.try_get("id")?,
        func: row.try_get("func")?,
        args: row.try_get("args")?,
        run_at: row.try_get("run_at")?,
        status: parse_status(row.try_get::<String, _>("status")?.as_str())?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error: row.try_get("error")?,
        result: row.try_get("result")?,
    })
}

/// `TaskStore` backed by a `barrow_task` table. Holds the pool and a handle
/// to the bus so a committed write can publish its wakeup.
pub struct PgTaskStore {
    pool: PgPool,
    bus: Arc<dyn NotificationBus>,
}

impl PgTaskStore {
    pub fn new(pool: PgPool, bus: Arc<dyn NotificationBus>) -> Self {
        Self { pool, bus }
    }

    async fn publish_if_eligible(&self, task: &Task, event: NotifyEvent) {
        if !should_notify_task(task.status, task.run_at) {
            return;
        }
        if let Err(err) = self
            .bus
            .publish(Notification::new(TASK_MODEL, task.id, event))
            .await
        {
            tracing::warn!(task_id = task.id, error = %err, "failed to publish task notification");
        }
    }

    /// Shared by `claim_and_execute` and `run_synchronously`: executes the
    /// already-locked `task` against `executor` and writes its terminal
    /// state, all on `tx`.
    async fn finish(
        tx: &mut Transaction<'_, Postgres>,
        mut task: Task,
        executor: &dyn TaskExecutor,
    ) -> anyhow::Result<Task> {
        task.started_at = Some(Utc::now());
        let outcome = barrow_core::current::scoped(task.clone(), executor.execute(&task)).await;

        let finished_at = Utc::now();
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
        task.finished_at = Some(finished_at);

        sqlx::query(
            r#"
            UPDATE barrow_task
            SET status = $1, started_at = $2, finished_at = $3, error = $4, result = $5
            WHERE id = $6
            "#,
        )
        .bind(status_str(task.status))
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(&task.error)
        .bind(&task.result)
        .bind(task.id)
        .execute(&mut **tx)
        .await?;

        Ok(task)
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn enqueue(&self, spec: EnqueueTask) -> anyhow::Result<Task> {
        let run_at = spec.run_at.unwrap_or_else(Utc::now);
        let row = sqlx::query(
            r#"
            INSERT INTO barrow_task (func, args, run_at, status)
            VALUES ($1, $2, $3, 'QUEUED')
            RETURNING id, func, args, run_at, status, started_at, finished_at, error, result
            "#,
        )
        .bind(&spec.func)
        .bind(&spec.args)
        .bind(run_at)
        .fetch_one(&self.pool)
        .await?;

        let task = task_from_row(&row)?;
        self.publish_if_eligible(&task, NotifyEvent::Create).await;
        Ok(task)
    }

    #[tracing::instrument(skip(self, executor), fields(task_id))]
    async fn claim_and_execute(
        &self,
        _worker_id: &str,
        executor: &dyn TaskExecutor,
    ) -> anyhow::Result<Option<Task>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            SELECT id, func, args, run_at, status, started_at, finished_at, error, result
            FROM barrow_task
            WHERE status = 'QUEUED' AND run_at < now()
            ORDER BY run_at, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = claimed else {
            tx.commit().await?;
            return Ok(None);
        };

        let task = task_from_row(&row)?;
        tracing::Span::current().record("task_id", task.id);
        let finished = Self::finish(&mut tx, task, executor).await?;
        tx.commit().await?;

        self.publish_if_eligible(&finished, NotifyEvent::Update).await;
        Ok(Some(finished))
    }

    #[tracing::instrument(skip(self, executor))]
    async fn run_synchronously(
        &self,
        task_id: i64,
        executor: &dyn TaskExecutor,
    ) -> anyhow::Result<Task> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, func, args, run_at, status, started_at, finished_at, error, result
            FROM barrow_task
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            anyhow::bail!("task {task_id} does not exist");
        };
        let task = task_from_row(&row)?;
        if task.status != TaskStatus::Queued {
            anyhow::bail!("task {task_id} is not QUEUED (status={:?})", task.status);
        }

        let finished = Self::finish(&mut tx, task, executor).await?;
        tx.commit().await?;

        self.publish_if_eligible(&finished, NotifyEvent::Update).await;
        Ok(finished)
    }

    async fn sweep_old(&self, ttl: ChronoDuration) -> anyhow::Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - ttl;
        let result = sqlx::query(
            r#"
            DELETE FROM barrow_task
            WHERE status IN ('DONE', 'FAILED') AND run_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cancel(&self, func: &str, args_match: Value) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, args FROM barrow_task
            WHERE func = $1 AND status = 'QUEUED'
            FOR UPDATE
            "#,
        )
        .bind(func)
        .fetch_all(&mut *tx)
        .await?;

        let mut matching_ids = Vec::new();
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let args: Option<Value> = row.try_get("args")?;
            if args_match_subset(&args, &args_match) {
                matching_ids.push(id);
            }
        }

        if matching_ids.is_empty() {
            tx.commit().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM barrow_task WHERE id = ANY($1)")
            .bind(&matching_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }
}
