//! Exercises `barrow_core::Worker` against the real `PgTaskStore`, using
//! `barrow-testing`'s in-memory bus in place of `PgNotificationBus` — the
//! wakeup path doesn't depend on which bus moved the notification, only
//! that the store published one, so this is a cheaper way to prove the
//! Worker loop drains a `PgTaskStore`-backed queue end to end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use barrow_core::config::WorkerConfig;
use barrow_core::store::{TaskExecutor, TaskStore};
use barrow_core::task::{EnqueueTask, TaskOutcome, TaskStatus};
use barrow_core::worker::Worker;
use barrow_postgres::PgTaskStore;
use barrow_testing::InMemoryBus;
use serde_json::json;
use sqlx::PgPool;

struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&self, task: &barrow_core::task::Task) -> TaskOutcome {
        TaskOutcome::Success(task.args.clone())
    }
}

#[sqlx::test]
async fn worker_drains_a_pg_backed_queue(pool: PgPool) {
    let bus = Arc::new(InMemoryBus::new());
    let store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pool, bus.clone()));

    store.enqueue(EnqueueTask::new("m.ok").with_args(json!({"x": 1}))).await.unwrap();

    let mut worker = Worker::new(
        "w1",
        store.clone(),
        Arc::new(EchoExecutor),
        bus as Arc<dyn barrow_core::bus::NotificationBus>,
        WorkerConfig::default(),
    );
    worker.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    worker.stop().await;

    assert!(store.claim_and_execute("w1", &EchoExecutor).await.unwrap().is_none());
}
