//! `TaskStore` over SQLite, single-connection pool.

use async_trait::async_trait;
use barrow_core::store::{TaskExecutor, TaskStore};
use barrow_core::task::{args_match_subset, EnqueueTask, Task, TaskOutcome, TaskStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool, Transaction, Sqlite};

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

fn encode_json(value: &Option<Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

fn decode_json(raw: Option<String>) -> anyhow::Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Task> {
    Ok(Task {
        id: row.try_get("id")?,
        func: row.try_get("func")?,
        args: decode_json(row.try_get("args")?)?,
        run_at: row.try_get("run_at")?,
        status: parse_status(row.try_get::<String, _>("status")?.as_str())?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error: row.try_get("error")?,
        result: decode_json(row.try_get("result")?)?,
    })
}

/// `TaskStore` backed by a `barrow_task` table on a single-connection
/// SQLite pool. No notifications are published — SQLite's backend has no
/// `LISTEN`/`NOTIFY` equivalent; callers pair this store with
/// `barrow_core::bus::NoOpBus` and rely on polling.
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn finish(
        tx: &mut Transaction<'_, Sqlite>,
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
            SET status = ?, started_at = ?, finished_at = ?, error = ?, result = ?
            WHERE id = ?
            "#,
        )
        .bind(status_str(task.status))
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(&task.error)
        .bind(encode_json(&task.result))
        .bind(task.id)
        .execute(&mut **tx)
        .await?;

        Ok(task)
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn enqueue(&self, spec: EnqueueTask) -> anyhow::Result<Task> {
        let run_at = spec.run_at.unwrap_or_else(Utc::now);
        let result = sqlx::query(
            "INSERT INTO barrow_task (func, args, run_at, status) VALUES (?, ?, ?, 'QUEUED')",
        )
        .bind(&spec.func)
        .bind(encode_json(&spec.args))
        .bind(run_at)
        .execute(&self.pool)
        .await?;

        Ok(Task {
            id: result.last_insert_rowid(),
            func: spec.func,
            args: spec.args,
            run_at,
            status: TaskStatus::Queued,
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        })
    }

    #[tracing::instrument(skip(self, executor), fields(task_id))]
    async fn claim_and_execute(
        &self,
        _worker_id: &str,
        executor: &dyn TaskExecutor,
    ) -> anyhow::Result<Option<Task>> {
        let mut tx = self.pool.begin().await?;

        // No SKIP LOCKED on SQLite: the pool holds exactly one connection
        // (see the module doc comment on `connect`), so there is never a
        // second transaction in flight to skip past.
        let claimed = sqlx::query(
            r#"
            SELECT id, func, args, run_at, status, started_at, finished_at, error, result
            FROM barrow_task
            WHERE status = 'QUEUED' AND run_at < ?
            ORDER BY run_at, id
            LIMIT 1
            "#,
        )
        .bind(Utc::now())
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
            WHERE id = ?
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
        Ok(finished)
    }

    async fn sweep_old(&self, ttl: ChronoDuration) -> anyhow::Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - ttl;
        let result = sqlx::query(
            "DELETE FROM barrow_task WHERE status IN ('DONE', 'FAILED') AND run_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cancel(&self, func: &str, args_match: Value) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query("SELECT id, args FROM barrow_task WHERE func = ? AND status = 'QUEUED'")
            .bind(func)
            .fetch_all(&mut *tx)
            .await?;

        let mut matching_ids = Vec::new();
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let args = decode_json(row.try_get("args")?)?;
            if args_match_subset(&args, &args_match) {
                matching_ids.push(id);
            }
        }

        if matching_ids.is_empty() {
            tx.commit().await?;
            return Ok(false);
        }

        for id in &matching_ids {
            sqlx::query("DELETE FROM barrow_task WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(true)
    }
}
