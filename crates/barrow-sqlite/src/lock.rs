//! `LockStore` over SQLite. Useful mainly for single-process
//! tests of the Leader Elector; a single SQLite process has no need to
//! contest a lease against itself, but the store still honors the fencing
//! protocol so Elector logic exercised against it matches production.

use async_trait::async_trait;
use barrow_core::lock::AcquireOutcome;
use barrow_core::store::LockStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub struct SqliteLockStore {
    pool: SqlitePool,
}

impl SqliteLockStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn try_acquire(
        &self,
        name: &str,
        me: Uuid,
        lease_ttl: ChronoDuration,
    ) -> anyhow::Result<AcquireOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT owner, locked_at FROM barrow_lock WHERE name = ?")
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
            sqlx::query("INSERT INTO barrow_lock (name, owner, locked_at) VALUES (?, ?, ?)")
                .bind(name)
                .bind(me.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("UPDATE barrow_lock SET owner = ?, locked_at = ? WHERE name = ?")
                .bind(me.to_string())
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
            "UPDATE barrow_lock SET locked_at = ? WHERE name = ? AND owner = ? AND locked_at = ?",
        )
        .bind(now)
        .bind(name)
        .bind(me.to_string())
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
            "UPDATE barrow_lock SET owner = NULL, locked_at = NULL WHERE name = ? AND owner = ? AND locked_at = ?",
        )
        .bind(name)
        .bind(me.to_string())
        .bind(locked_at_expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
