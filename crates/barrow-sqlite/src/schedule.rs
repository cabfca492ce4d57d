//! `ScheduleStore` over SQLite, single-connection pool.

use async_trait::async_trait;
use barrow_core::schedule::{EnqueueSchedule, Schedule};
use barrow_core::store::{FiredSchedule, ScheduleExecutor, ScheduleStore};
use barrow_core::task::{Task, TaskStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};

fn encode_json(value: &Option<Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

fn decode_json(raw: Option<String>) -> anyhow::Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
}

fn schedule_from_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Schedule> {
    Ok(Schedule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        func: row.try_get("func")?,
        args: decode_json(row.try_get("args")?)?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        cron: row.try_get("cron")?,
        interval_seconds: row.try_get("interval_seconds")?,
        next_run_at: row.try_get("next_run_at")?,
        last_run_at: row.try_get("last_run_at")?,
    })
}

/// `ScheduleStore` backed by a `barrow_schedule` table, materializing fired
/// schedules into `barrow_task` rows in the same transaction.
pub struct SqliteScheduleStore {
    pool: SqlitePool,
}

impl SqliteScheduleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleStore for SqliteScheduleStore {
    async fn enqueue(&self, spec: EnqueueSchedule) -> anyhow::Result<Schedule> {
        spec.validate()?;
        let result = sqlx::query(
            r#"
            INSERT INTO barrow_schedule (name, func, args, is_active, cron, interval_seconds, next_run_at)
            VALUES (?, ?, ?, 1, ?, ?, ?)
            "#,
        )
        .bind(&spec.name)
        .bind(&spec.func)
        .bind(encode_json(&spec.args))
        .bind(&spec.cron)
        .bind(spec.interval.map(|d| d.num_seconds()))
        .bind(spec.next_run_at)
        .execute(&self.pool)
        .await?;

        Ok(Schedule {
            id: result.last_insert_rowid(),
            name: spec.name,
            func: spec.func,
            args: spec.args,
            is_active: true,
            cron: spec.cron,
            interval_seconds: spec.interval.map(|d| d.num_seconds()),
            next_run_at: spec.next_run_at,
            last_run_at: None,
        })
    }

    #[tracing::instrument(skip(self, executor), fields(schedule_id))]
    async fn claim_and_fire(
        &self,
        executor: &dyn ScheduleExecutor,
    ) -> anyhow::Result<Option<FiredSchedule>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            SELECT id, name, func, args, is_active, cron, interval_seconds, next_run_at, last_run_at
            FROM barrow_schedule
            WHERE is_active = 1 AND (next_run_at IS NULL OR next_run_at < ?)
            ORDER BY next_run_at IS NOT NULL, next_run_at, id
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

        let mut schedule = schedule_from_row(&row)?;
        tracing::Span::current().record("schedule_id", schedule.id);
        let now = Utc::now();
        let materialized = executor.fire(&mut schedule, now)?;

        sqlx::query(
            "UPDATE barrow_schedule SET is_active = ?, next_run_at = ?, last_run_at = ? WHERE id = ?",
        )
        .bind(schedule.is_active as i64)
        .bind(schedule.next_run_at)
        .bind(schedule.last_run_at)
        .bind(schedule.id)
        .execute(&mut *tx)
        .await?;

        let task_run_at: DateTime<Utc> = materialized.run_at.unwrap_or(now);
        let insert = sqlx::query(
            "INSERT INTO barrow_task (func, args, run_at, status) VALUES (?, ?, ?, 'QUEUED')",
        )
        .bind(&materialized.func)
        .bind(encode_json(&materialized.args))
        .bind(task_run_at)
        .execute(&mut *tx)
        .await?;

        let task = Task {
            id: insert.last_insert_rowid(),
            func: materialized.func,
            args: materialized.args,
            run_at: task_run_at,
            status: TaskStatus::Queued,
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        };

        tx.commit().await?;
        Ok(Some(FiredSchedule { schedule, task }))
    }

    async fn sweep_old(&self, ttl: ChronoDuration) -> anyhow::Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - ttl;
        let result = sqlx::query(
            "DELETE FROM barrow_schedule WHERE is_active = 0 AND next_run_at IS NOT NULL AND next_run_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
