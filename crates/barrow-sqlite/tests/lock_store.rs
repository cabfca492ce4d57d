//! `LockStore` fencing-token protocol against an in-memory SQLite database,
//! mirroring the PostgreSQL backend's failover coverage.

use barrow_core::lock::AcquireOutcome;
use barrow_core::store::LockStore;
use barrow_sqlite::SqliteLockStore;
use chrono::Duration as ChronoDuration;
use uuid::Uuid;

#[tokio::test]
async fn solo_acquire_succeeds() {
    let pool = barrow_sqlite::connect(":memory:").await.unwrap();
    let store = SqliteLockStore::new(pool);
    let me = Uuid::new_v4();
    let outcome = store.try_acquire("leader", me, ChronoDuration::seconds(30)).await.unwrap();
    assert!(matches!(outcome, AcquireOutcome::Acquired { .. }));
}

#[tokio::test]
async fn second_owner_is_rejected_while_lease_is_fresh() {
    let pool = barrow_sqlite::connect(":memory:").await.unwrap();
    let store = SqliteLockStore::new(pool);
    let e1 = Uuid::new_v4();
    let e2 = Uuid::new_v4();

    store.try_acquire("leader", e1, ChronoDuration::seconds(30)).await.unwrap();
    let outcome = store.try_acquire("leader", e2, ChronoDuration::seconds(30)).await.unwrap();
    assert!(matches!(outcome, AcquireOutcome::HeldByOther));
}

#[tokio::test]
async fn failover_after_rotten_lease() {
    let pool = barrow_sqlite::connect(":memory:").await.unwrap();
    let store = SqliteLockStore::new(pool);
    let e1 = Uuid::new_v4();
    let e2 = Uuid::new_v4();

    store.try_acquire("leader", e1, ChronoDuration::seconds(-1)).await.unwrap();
    let outcome = store.try_acquire("leader", e2, ChronoDuration::seconds(30)).await.unwrap();
    assert!(matches!(outcome, AcquireOutcome::Acquired { .. }));

    let now = chrono::Utc::now();
    assert!(!store.release("leader", e1, now).await.unwrap());
}

#[tokio::test]
async fn release_clears_lease_for_reacquisition() {
    let pool = barrow_sqlite::connect(":memory:").await.unwrap();
    let store = SqliteLockStore::new(pool);
    let me = Uuid::new_v4();
    let locked_at = match store.try_acquire("leader", me, ChronoDuration::seconds(30)).await.unwrap() {
        AcquireOutcome::Acquired { locked_at } => locked_at,
        other => panic!("expected Acquired, got {other:?}"),
    };

    assert!(store.release("leader", me, locked_at).await.unwrap());

    let other = Uuid::new_v4();
    let outcome = store.try_acquire("leader", other, ChronoDuration::seconds(30)).await.unwrap();
    assert!(matches!(outcome, AcquireOutcome::Acquired { .. }));
}
