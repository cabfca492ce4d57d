//! Notification Bus: collapses polling latency by turning a
//! committed row change into a cross-process wakeup. An optimization,
//! never a correctness requirement — every loop still functions on pure
//! polling with the bus disabled (`NoOpBus`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which kind of row change triggered the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyEvent {
    Create,
    Update,
}

/// The NOTIFY payload, version 1.0.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub version: String,
    /// `<app>.<model>`, e.g. `"barrow.task"`.
    pub model: String,
    pub pk: i64,
    pub event: NotifyEvent,
}

impl Notification {
    pub fn new(model: impl Into<String>, pk: i64, event: NotifyEvent) -> Self {
        Self {
            version: "1.0.0".into(),
            model: model.into(),
            pk,
            event,
        }
    }

    /// Renders `template`'s `%(app)s`/`%(model)s` placeholders against
    /// `model` (an `"<app>.<model>"` string, e.g. `"barrow.task"`), split
    /// on its first `.`. Falls back to an empty `app` if `model` carries
    /// no dot.
    pub fn channel_name(model: &str, template: &str) -> String {
        let (app, model_part) = model.split_once('.').unwrap_or(("", model));
        template.replace("%(app)s", app).replace("%(model)s", model_part)
    }
}

/// Publishes row-change events and lets Worker/Scheduler subscribe to
/// wakeups. PostgreSQL backs this with `LISTEN`/`NOTIFY` on a dedicated
/// connection; SQLite (single-process only) has no equivalent and uses
/// `NoOpBus`.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    /// Publishes a notification after the triggering row's transaction has
    /// committed. Implementations must apply `should_notify_task`/
    /// `should_notify_schedule` before calling this: never for a row
    /// inserted with a future eligibility instant, nor for one that is no
    /// longer queued/active.
    async fn publish(&self, note: Notification) -> anyhow::Result<()>;

    /// A fresh subscription; multiple subscribers may coexist.
    fn subscribe(&self) -> BusSubscription;
}

/// A live subscription to the bus. `recv` resolves the next time a
/// matching notification arrives, or never resolves on a `NoOpBus`.
pub struct BusSubscription {
    inner: Option<tokio::sync::broadcast::Receiver<Notification>>,
}

impl BusSubscription {
    pub fn from_receiver(rx: tokio::sync::broadcast::Receiver<Notification>) -> Self {
        Self { inner: Some(rx) }
    }

    pub fn inert() -> Self {
        Self { inner: None }
    }

    /// Waits for the next notification. Never resolves if the bus is
    /// disabled, which is by design: the caller's composite sleep always
    /// races this against a poll-interval timeout.
    pub async fn recv(&mut self) -> Option<Notification> {
        match &mut self.inner {
            Some(rx) => loop {
                match rx.recv().await {
                    Ok(note) => return Some(note),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
                }
            },
            None => std::future::pending().await,
        }
    }
}

/// Degraded mode: publishing is a no-op, subscribing never wakes. Used for
/// SQLite and whenever `BUS_ENABLED=false`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpBus;

#[async_trait]
impl NotificationBus for NoOpBus {
    async fn publish(&self, _note: Notification) -> anyhow::Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> BusSubscription {
        BusSubscription::inert()
    }
}

/// Decides whether a just-committed Task write should be notified: skip
/// rows not `QUEUED`, and skip rows whose `run_at` is still in the future.
pub fn should_notify_task(status: crate::task::TaskStatus, run_at: chrono::DateTime<chrono::Utc>) -> bool {
    status == crate::task::TaskStatus::Queued && run_at <= chrono::Utc::now()
}

/// The schedule equivalent: skip inactive schedules, and skip ones whose
/// `next_run_at` is still in the future.
pub fn should_notify_schedule(
    is_active: bool,
    next_run_at: Option<chrono::DateTime<chrono::Utc>>,
) -> bool {
    is_active && next_run_at.is_none_or(|at| at <= chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_renders_the_default_template() {
        assert_eq!(
            Notification::channel_name("myapp.task", "barrow_%(app)s_%(model)s"),
            "barrow_myapp_task"
        );
    }

    #[test]
    fn channel_name_honors_a_custom_template() {
        assert_eq!(
            Notification::channel_name("myapp.task", "%(model)s.%(app)s.events"),
            "task.myapp.events"
        );
    }

    #[tokio::test]
    async fn noop_bus_never_wakes() {
        let bus = NoOpBus;
        let mut sub = bus.subscribe();
        let result = tokio::time::timeout(std::time::Duration::from_millis(20), sub.recv()).await;
        assert!(result.is_err(), "NoOpBus subscription must never resolve");
    }

    #[tokio::test]
    async fn published_notification_reaches_subscriber() {
        let (tx, rx) = tokio::sync::broadcast::channel(16);
        let mut sub = BusSubscription::from_receiver(rx);
        tx.send(Notification::new("barrow.task", 1, NotifyEvent::Create))
            .unwrap();
        let note = sub.recv().await.unwrap();
        assert_eq!(note.pk, 1);
    }

    #[test]
    fn future_run_at_is_not_notified() {
        let future = chrono::Utc::now() + chrono::Duration::hours(1);
        assert!(!should_notify_task(crate::task::TaskStatus::Queued, future));
    }

    #[test]
    fn non_queued_status_is_not_notified() {
        assert!(!should_notify_task(
            crate::task::TaskStatus::Done,
            chrono::Utc::now()
        ));
    }
}
