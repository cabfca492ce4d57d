//! `LockStore` over PostgreSQL: a single `barrow_lock` row
//! per named lease, `(owner, locked_at)` as the fencing token.

use async_trait::async_trait;
use barrow_core::lock::AcquireOutcome;
use barrow_core::store::LockStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// `LockStore` backed by a `barrow_lock` table.
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn try_acquire(
        &self,
        name: &str,
        me: Uuid,
        lease_ttl: ChronoDuration,
    ) -> anyhow::Result<AcquireOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT owner, locked_at FROM barrow_lock WHERE name = $1 FOR UPDATE",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let now = Utc::now();
        let rotten = match &existing {
            None => true,
            Some(row) => {
                let locked_at: Option<DateTime<Utc>> = row.try_get("locked_at")?;
                match locked_at {
                    Some(locked_at) => now - locked_at > lease_ttl,
                    None => true,
                }
            }
        };

        if !rotten {
            tx.commit().await?;
            return Ok(AcquireOutcome::HeldByOther);
        }

        if existing.is_none() {
            sqlx::query(
                "INSERT INTO barrow_lock (name, owner, locked_at) VALUES ($1, $2, $3)",
            )
            .bind(name)
            .bind(me)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query("UPDATE barrow_lock SET owner = $1, locked_at = $2 WHERE name = $3")
                .bind(me)
                .bind(now)
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(AcquireOutcome::Acquired { locked_at: now })
    }

    async fn confirm(
        &self,
        name: &str,
        me: Uuid,
        locked_at_expected: DateTime<Utc>,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE barrow_lock
            SET locked_at = $1
            WHERE name = $2 AND owner = $3 AND locked_at = $4
            "#,
        )
        .bind(now)
        .bind(name)
        .bind(me)
        .bind(locked_at_expected)
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() == 1).then_some(now))
    }

    async fn release(
        &self,
        name: &str,
        me: Uuid,
        locked_at_expected: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE barrow_lock
            SET owner = NULL, locked_at = NULL
            WHERE name = $1 AND owner = $2 AND locked_at = $3
            "#,
        )
        .bind(name)
        .bind(me)
        .bind(locked_at_expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
