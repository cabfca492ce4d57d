//! SQLite backend for `barrow-core`'s store traits — the single-process
//! development fallback for when a PostgreSQL instance isn't available.
//!
//! Two things don't exist in SQLite and are handled by degrading rather
//! than faking: `FOR UPDATE SKIP LOCKED` has no SQLite equivalent, so
//! [`connect`] configures the pool with exactly one connection — there is
//! never a second writer to skip past, so a plain `SELECT ... LIMIT 1`
//! inside a transaction gives the same at-most-one-claimant guarantee by
//! construction. `LISTEN`/`NOTIFY` has no SQLite equivalent either, so this
//! crate hands the caller `barrow_core::bus::NoOpBus` — every loop still
//! functions on pure polling, which is the point of this
//! backend existing at all.

mod lock;
mod schedule;
mod task;

pub use lock::SqliteLockStore;
pub use schedule::SqliteScheduleStore;
pub use task::SqliteTaskStore;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Opens a single-connection pool against `path` (or an in-memory database
/// for `path == ":memory:"`) and applies the embedded migrations. A single
/// connection is load-bearing, not an arbitrary tuning choice — see the
/// module doc comment.
pub async fn connect(path: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Applies the embedded migrations against an already-open pool. Exposed
/// separately from [`connect`] for callers (tests, `barrow-testing`) that
/// construct their own pool.
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
