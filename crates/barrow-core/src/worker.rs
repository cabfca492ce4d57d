//! The Worker loop: claim → execute → record outcome, plus
//! a TTL sweep.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bus::NotificationBus;
use crate::config::WorkerConfig;
use crate::lifecycle::{sleep_until_woken, StopHandle, WakeupHandle};
use crate::signals::TaskSignals;
use crate::store::{TaskExecutor, TaskStore};
use crate::task::{Task, TaskOutcome};

/// Wraps a caller-supplied `TaskExecutor` to fire a Worker's
/// `pre_task_execute`/`post_task_execute` hooks around it, regardless of
/// which executor (a `RegistryExecutor` or any other impl) is in use.
struct SignalingExecutor {
    inner: Arc<dyn TaskExecutor>,
    signals: TaskSignals,
}

#[async_trait::async_trait]
impl TaskExecutor for SignalingExecutor {
    async fn execute(&self, task: &Task) -> TaskOutcome {
        self.signals.fire_pre(task);
        let outcome = self.inner.execute(task).await;
        match &outcome {
            TaskOutcome::Success(_) => self.signals.fire_post(task, None),
            TaskOutcome::Failure(message) => self.signals.fire_post(task, Some(message)),
        }
        outcome
    }
}

/// A long-running `start → run → stop` component claiming and executing
/// due tasks.
pub struct Worker {
    name: String,
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    bus: Arc<dyn NotificationBus>,
    config: WorkerConfig,
    signals: TaskSignals,
    stop: StopHandle,
    wakeup: WakeupHandle,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn TaskExecutor>,
        bus: Arc<dyn NotificationBus>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            executor,
            bus,
            config,
            signals: TaskSignals::default(),
            stop: StopHandle::new(),
            wakeup: WakeupHandle::new(),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Registers a hook fired before a claimed task's invocation. Must be
    /// called before `start()`.
    pub fn on_pre_execute<F>(&mut self, f: F)
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.signals.on_pre_execute(f);
    }

    /// Registers a hook fired after a claimed task's invocation. `error` is
    /// `Some(formatted trace)` on failure, `None` on success.
    pub fn on_post_execute<F>(&mut self, f: F)
    where
        F: Fn(&Task, Option<&str>) + Send + Sync + 'static,
    {
        self.signals.on_post_execute(f);
    }

    fn signaling_executor(&self) -> Arc<dyn TaskExecutor> {
        Arc::new(SignalingExecutor {
            inner: self.executor.clone(),
            signals: self.signals.clone(),
        })
    }

    /// Starts the loop on its own task. A separate task relays bus
    /// notifications into the composite wakeup.
    pub fn start(&mut self) {
        self.stop.reset();
        let inner = WorkerLoop {
            name: self.name.clone(),
            store: self.store.clone(),
            executor: self.signaling_executor(),
            config: self.config.clone(),
            stop: self.stop.clone(),
            wakeup: self.wakeup.clone(),
        };

        let mut subscription = self.bus.subscribe();
        let wakeup_relay = self.wakeup.clone();
        let stop_relay = self.stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_relay.wait() => break,
                    note = subscription.recv() => {
                        match note {
                            Some(_) => wakeup_relay.wakeup(),
                            None => break,
                        }
                    }
                }
            }
        });

        self.handle = Some(tokio::spawn(inner.run()));
    }

    /// Sets the stop flag and joins the loop task with a bounded timeout
    /// of a few seconds. A task already executing runs to completion.
    pub async fn stop(&mut self) {
        self.stop.stop();
        self.signals.clear();
        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
        }
    }

    /// `RunSynchronously`: locks and executes one row in the caller's
    /// transaction. Rejects a task that is no longer `QUEUED`.
    pub async fn run_synchronously(&self, task_id: i64) -> anyhow::Result<Task> {
        let executor = self.signaling_executor();
        self.store.run_synchronously(task_id, executor.as_ref()).await
    }
}

struct WorkerLoop {
    name: String,
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    config: WorkerConfig,
    stop: StopHandle,
    wakeup: WakeupHandle,
}

impl WorkerLoop {
    async fn run(self) {
        info!(worker = %self.name, "started");
        while !self.stop.is_stopped() {
            if let Err(err) = self.drain().await {
                warn!(worker = %self.name, error = %err, "drain phase failed, will retry next tick");
            }
            if let Some(ttl) = self.config.finished_ttl {
                match self
                    .store
                    .sweep_old(chrono::Duration::from_std(ttl).unwrap_or_default())
                    .await
                {
                    Ok(0) => debug!(worker = %self.name, "no finished tasks to sweep"),
                    Ok(n) => info!(worker = %self.name, count = n, "swept finished tasks"),
                    Err(err) => warn!(worker = %self.name, error = %err, "sweep phase failed"),
                }
            }
            if self.stop.is_stopped() {
                break;
            }
            sleep_until_woken(self.config.poll_interval, &self.stop, &self.wakeup).await;
        }
        info!(worker = %self.name, "finished");
    }

    /// Repeatedly claims one task until none remain or `stop` fires.
    async fn drain(&self) -> anyhow::Result<()> {
        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }
            match self
                .store
                .claim_and_execute(&self.name, self.executor.as_ref())
                .await?
            {
                Some(task) => {
                    debug!(worker = %self.name, task_id = task.id, status = ?task.status, "processed a task");
                }
                None => {
                    debug!(worker = %self.name, "no pending tasks");
                    return Ok(());
                }
            }
        }
    }
}
