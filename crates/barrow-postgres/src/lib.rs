//! PostgreSQL backend for `barrow-core`'s store traits.
//!
//! A thin `sqlx::PgPool` wrapper speaking plain `sqlx::query` (no
//! compile-time `query!` macro, so this crate builds without a live
//! database at compile time), one `anyhow::Result` per trait method, and
//! a companion migration embedded via `sqlx::migrate!()`.
//!
//! `FOR UPDATE SKIP LOCKED` backs `TaskStore::claim_and_execute` and
//! `ScheduleStore::claim_and_fire`; `LISTEN`/`NOTIFY` backs
//! [`bus::PgNotificationBus`]. No backend-specific SQL leaks into
//! `barrow_core` — this crate only implements the traits it defines.

mod bus;
mod lock;
mod schedule;
mod task;

pub use bus::PgNotificationBus;
pub use lock::PgLockStore;
pub use schedule::PgScheduleStore;
pub use task::PgTaskStore;

use sqlx::PgPool;

/// `<app>.<model>` identifiers used in NOTIFY payloads and channel names.
pub const TASK_MODEL: &str = "barrow.task";
pub const SCHEDULE_MODEL: &str = "barrow.schedule";

/// Applies the embedded migrations (creates `barrow_task`, `barrow_schedule`,
/// `barrow_lock` and their indices if absent). Idempotent; safe to call on
/// every process startup.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
