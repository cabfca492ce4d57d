//! End-to-end claim/execute/cancel scenarios against an in-memory SQLite
//! database, adapted for the single-connection backend.

use async_trait::async_trait;
use barrow_core::store::{TaskExecutor, TaskStore};
use barrow_core::task::{EnqueueTask, TaskOutcome, TaskStatus};
use barrow_sqlite::SqliteTaskStore;
use serde_json::json;

struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&self, task: &barrow_core::task::Task) -> TaskOutcome {
        TaskOutcome::Success(task.args.clone())
    }
}

struct AlwaysFailsExecutor;

#[async_trait]
impl TaskExecutor for AlwaysFailsExecutor {
    async fn execute(&self, _task: &barrow_core::task::Task) -> TaskOutcome {
        TaskOutcome::Failure("RuntimeError(\"71ADA163\")".into())
    }
}

#[tokio::test]
async fn happy_path_marks_task_done() {
    let pool = barrow_sqlite::connect(":memory:").await.unwrap();
    let store = SqliteTaskStore::new(pool);

    store.enqueue(EnqueueTask::new("m.ok").with_args(json!({"x": 1}))).await.unwrap();

    let claimed = store
        .claim_and_execute("w1", &EchoExecutor)
        .await
        .unwrap()
        .expect("one due task");

    assert_eq!(claimed.status, TaskStatus::Done);
    assert_eq!(claimed.result, Some(json!({"x": 1})));
    assert!(store.claim_and_execute("w1", &EchoExecutor).await.unwrap().is_none());
}

#[tokio::test]
async fn failure_path_records_error() {
    let pool = barrow_sqlite::connect(":memory:").await.unwrap();
    let store = SqliteTaskStore::new(pool);
    store.enqueue(EnqueueTask::new("m.boom")).await.unwrap();

    let claimed = store
        .claim_and_execute("w1", &AlwaysFailsExecutor)
        .await
        .unwrap()
        .expect("one due task");

    assert_eq!(claimed.status, TaskStatus::Failed);
    assert!(claimed.error.as_deref().unwrap().contains("71ADA163"));
}

#[tokio::test]
async fn cancel_removes_only_the_matching_queued_task() {
    let pool = barrow_sqlite::connect(":memory:").await.unwrap();
    let store = SqliteTaskStore::new(pool);

    store.enqueue(EnqueueTask::new("f").with_args(json!({"a": 1, "b": 3}))).await.unwrap();
    store.enqueue(EnqueueTask::new("f").with_args(json!({"a": 2, "b": 4}))).await.unwrap();

    assert!(!store.cancel("f", json!({"a": 1, "b": 4})).await.unwrap());
    assert!(store.cancel("f", json!({"a": 2, "b": 4})).await.unwrap());

    let remaining = store.claim_and_execute("w1", &EchoExecutor).await.unwrap().unwrap();
    assert_eq!(remaining.args, Some(json!({"a": 1, "b": 3})));
    assert!(store.claim_and_execute("w1", &EchoExecutor).await.unwrap().is_none());
}

#[tokio::test]
async fn future_run_at_is_not_claimable() {
    let pool = barrow_sqlite::connect(":memory:").await.unwrap();
    let store = SqliteTaskStore::new(pool);
    store
        .enqueue(EnqueueTask::new("m.later").with_run_at(chrono::Utc::now() + chrono::Duration::hours(1)))
        .await
        .unwrap();

    assert!(store.claim_and_execute("w1", &EchoExecutor).await.unwrap().is_none());
}

#[tokio::test]
async fn sweep_old_deletes_only_terminal_rows_past_ttl() {
    let pool = barrow_sqlite::connect(":memory:").await.unwrap();
    let store = SqliteTaskStore::new(pool);
    store
        .enqueue(EnqueueTask::new("m.old").with_run_at(chrono::Utc::now() - chrono::Duration::days(2)))
        .await
        .unwrap();
    store.claim_and_execute("w1", &EchoExecutor).await.unwrap();

    let swept = store.sweep_old(chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(swept, 1);
}
