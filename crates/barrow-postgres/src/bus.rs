//! `NotificationBus` over PostgreSQL `LISTEN`/`NOTIFY`.
//!
//! One dedicated `PgListener` connection, `listen_all` on every channel
//! this process cares about, and a background task that re-dispatches
//! each delivered notification in-process. The re-dispatch target is a
//! `tokio::sync::broadcast` channel that `barrow_core::bus::BusSubscription`
//! already knows how to drain.

use std::time::Duration;

use async_trait::async_trait;
use barrow_core::bus::{BusSubscription, Notification, NotificationBus};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;

use crate::{SCHEDULE_MODEL, TASK_MODEL};

/// How long a single `recv` blocks before the listener loop re-checks for
/// shutdown.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// `NotificationBus` backed by a dedicated `LISTEN` connection. Publishing
/// uses the shared pool (any connection may `NOTIFY`); subscribing hands out
/// receivers on an in-process broadcast channel fed by the listener task.
pub struct PgNotificationBus {
    pool: PgPool,
    channel_template: String,
    sender: broadcast::Sender<Notification>,
    _listener_task: tokio::task::JoinHandle<()>,
}

impl PgNotificationBus {
    /// Opens the dedicated listener connection, subscribes to every channel
    /// this crate's models publish on (named per `channel_template`'s
    /// `%(app)s`/`%(model)s` placeholders, e.g. `BusConfig::default()`'s
    /// `barrow_%(app)s_%(model)s`), and spawns the re-dispatch task.
    pub async fn connect(pool: PgPool, channel_template: impl Into<String>) -> anyhow::Result<Self> {
        let channel_template = channel_template.into();
        let mut listener = PgListener::connect_with(&pool).await?;
        listener
            .listen_all([
                Notification::channel_name(TASK_MODEL, &channel_template).as_str(),
                Notification::channel_name(SCHEDULE_MODEL, &channel_template).as_str(),
            ])
            .await?;

        let (sender, _) = broadcast::channel(1024);
        let task_sender = sender.clone();
        let listener_task = tokio::spawn(async move {
            loop {
                match tokio::time::timeout(RECV_TIMEOUT, listener.recv()).await {
                    Ok(Ok(raw)) => match serde_json::from_str::<Notification>(raw.payload()) {
                        Ok(note) => {
                            // A send error only means no subscribers are
                            // currently listening; that's fine, the next
                            // poll-interval wakeup will pick up the row.
                            let _ = task_sender.send(note);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, payload = raw.payload(), "dropping malformed NOTIFY payload");
                        }
                    },
                    Ok(Err(err)) => {
                        tracing::warn!(error = %err, "listener connection error, sqlx will reconnect");
                    }
                    Err(_elapsed) => {
                        // Timed out with nothing pending; loop and recv again.
                    }
                }
            }
        });

        Ok(Self {
            pool,
            channel_template,
            sender,
            _listener_task: listener_task,
        })
    }
}

#[async_trait]
impl NotificationBus for PgNotificationBus {
    async fn publish(&self, note: Notification) -> anyhow::Result<()> {
        let channel = Notification::channel_name(&note.model, &self.channel_template);
        let payload = serde_json::to_string(&note)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&channel)
            .bind(&payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn subscribe(&self) -> BusSubscription {
        BusSubscription::from_receiver(self.sender.subscribe())
    }
}

impl Drop for PgNotificationBus {
    fn drop(&mut self) {
        self._listener_task.abort();
    }
}
