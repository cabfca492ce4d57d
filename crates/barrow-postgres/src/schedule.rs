//! `ScheduleStore` over PostgreSQL.

use std::sync::Arc;

use async_trait::async_trait;
use barrow_core::bus::{should_notify_schedule, should_notify_task, NotificationBus, Notification, NotifyEvent};
use barrow_core::schedule::{EnqueueSchedule, Schedule};
use barrow_core::store::{FiredSchedule, ScheduleExecutor, ScheduleStore};
use barrow_core::task::{Task, TaskStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};

use crate::{SCHEDULE_MODEL, TASK_MODEL};

fn schedule_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<Schedule> {
    Ok(Schedule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        func: row.try_get("func")?,
        args: row.try_get("args")?,
        is_active: row.try_get("is_active")?,
        cron: row.try_get("cron")?,
        interval_seconds: row.try_get("interval_seconds")?,
        next_run_at: row.try_get("next_run_at")?,
        last_run_at: row.try_get("last_run_at")?,
    })
}

/// `ScheduleStore` backed by a `barrow_schedule` table, materializing fired
/// schedules into `barrow_task` rows in the same transaction.
pub struct PgScheduleStore {
    pool: PgPool,
    bus: Arc<dyn NotificationBus>,
}

impl PgScheduleStore {
    pub fn new(pool: PgPool, bus: Arc<dyn NotificationBus>) -> Self {
        Self { pool, bus }
    }

    async fn publish_schedule(&self, schedule: &Schedule) {
        if !should_notify_schedule(schedule.is_active, schedule.next_run_at) {
            return;
        }
        if let Err(err) = self
            .bus
            .publish(Notification::new(SCHEDULE_MODEL, schedule.id, NotifyEvent::Update))
            .await
        {
            tracing::warn!(schedule_id = schedule.id, error = %err, "failed to publish schedule notification");
        }
    }

    async fn publish_task(&self, task: &Task) {
        if !should_notify_task(task.status, task.run_at) {
            return;
        }
        if let Err(err) = self
            .bus
            .publish(Notification::new(TASK_MODEL, task.id, NotifyEvent::Create))
            .await
        {
            tracing::warn!(task_id = task.id, error = %err, "failed to publish task notification");
        }
    }
}

#[async_trait]
impl ScheduleStore for PgScheduleStore {
    async fn enqueue(&self, spec: EnqueueSchedule) -> anyhow::Result<Schedule> {
        spec.validate()?;
        let row = sqlx::query(
            r#"
            INSERT INTO barrow_schedule (name, func, args, is_active, cron, interval_seconds, next_run_at)
            VALUES ($1, $2, $3, true, $4, $5, $6)
            RETURNING id, name, func, args, is_active, cron, interval_seconds, next_run_at, last_run_at
            "#,
        )
        .bind(&spec.name)
        .bind(&spec.func)
        .bind(&spec.args)
        .bind(&spec.cron)
        .bind(spec.interval.map(|d| d.num_seconds()))
        .bind(spec.next_run_at)
        .fetch_one(&self.pool)
        .await?;

        schedule_from_row(&row)
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
            WHERE is_active AND (next_run_at IS NULL OR next_run_at < now())
            ORDER BY next_run_at NULLS FIRST, id
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

        let mut schedule = schedule_from_row(&row)?;
        tracing::Span::current().record("schedule_id", schedule.id);
        let now = Utc::now();
        let materialized = executor.fire(&mut schedule, now)?;

        sqlx::query(
            r#"
            UPDATE barrow_schedule
            SET is_active = $1, next_run_at = $2, last_run_at = $3
            WHERE id = $4
            "#,
        )
        .bind(schedule.is_active)
        .bind(schedule.next_run_at)
        .bind(schedule.last_run_at)
        .bind(schedule.id)
        .execute(&mut *tx)
        .await?;

        let task_run_at: DateTime<Utc> = materialized.run_at.unwrap_or(now);
        let task_row = sqlx::query(
            r#"
            INSERT INTO barrow_task (func, args, run_at, status)
            VALUES ($1, $2, $3, 'QUEUED')
            RETURNING id, func, args, run_at, status, started_at, finished_at, error, result
            "#,
        )
        .bind(&materialized.func)
        .bind(&materialized.args)
        .bind(task_run_at)
        .fetch_one(&mut *tx)
        .await?;

        let task = Task {
            id: task_row.try_get("id")?,
            func: task_row.try_get("func")?,
            args: task_row.try_get("args")?,
            run_at: task_row.try_get("run_at")?,
            status: TaskStatus::Queued,
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        };

        tx.commit().await?;

        self.publish_schedule(&schedule).await;
        self.publish_task(&task).await;

        Ok(Some(FiredSchedule { schedule, task }))
    }

    async fn sweep_old(&self, ttl: ChronoDuration) -> anyhow::Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - ttl;
        let result = sqlx::query(
            r#"
            DELETE FROM barrow_schedule
            WHERE is_active = false AND next_run_at IS NOT NULL AND next_run_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
