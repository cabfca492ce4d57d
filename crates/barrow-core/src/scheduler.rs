//! The Scheduler loop: claim due schedule → enqueue task →
//! advance, plus a TTL sweep. Runs at most once per process; if more than
//! one process runs a Scheduler, a `LeaderElector` gates it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::bus::NotificationBus;
use crate::config::SchedulerConfig;
use crate::cron;
use crate::lifecycle::{sleep_until_woken, StopHandle, WakeupHandle};
use crate::schedule::{materialize_task, FiringPolicy, Schedule};
use crate::signals::ScheduleSignals;
use crate::store::{FiredSchedule, ScheduleExecutor, ScheduleStore};
use crate::task::EnqueueTask;

/// Advances `schedule` in place (the `Advance` operation), and returns
/// the `EnqueueTask` spec to materialize for this firing.
///
/// `run_at` on the materialized task is the schedule's `next_run_at` (the
/// instant it was due at), not "now" — the resolved open
/// question, kept for predictable latency math.
struct Advancer {
    signals: ScheduleSignals,
}

impl ScheduleExecutor for Advancer {
    fn fire(&self, schedule: &mut Schedule, now: chrono::DateTime<Utc>) -> anyhow::Result<EnqueueTask> {
        self.signals.fire_pre(schedule);

        let spec = materialize_task(schedule);

        schedule.last_run_at = Some(now);
        match schedule.firing_policy() {
            Ok(FiringPolicy::Interval(interval)) => {
                // Open question: the source advances from
                // "now + interval" (drift with load under a busy
                // scheduler), not "next_run_at + interval" (drift-free).
                // We keep the source's behavior and document the drift.
                schedule.next_run_at = Some(now + interval);
            }
            Ok(FiringPolicy::Cron(expr)) => {
                let anchor = schedule.next_run_at.unwrap_or(now).max(now);
                match cron::next_after(schedule.id, &expr, anchor) {
                    Ok(next) => schedule.next_run_at = Some(next),
                    Err(err) => {
                        warn!(schedule_id = schedule.id, error = %err, "deactivating schedule with invalid cron");
                        schedule.is_active = false;
                    }
                }
            }
            Ok(FiringPolicy::OneShot) => {
                schedule.is_active = false;
            }
            Err(err) => {
                warn!(schedule_id = schedule.id, error = %err, "deactivating misconfigured schedule");
                schedule.is_active = false;
            }
        }

        self.signals.fire_post(schedule);
        Ok(spec)
    }
}

/// A long-running `start → run → stop` component firing due schedules.
pub struct Scheduler {
    store: Arc<dyn ScheduleStore>,
    bus: Arc<dyn NotificationBus>,
    config: SchedulerConfig,
    signals: ScheduleSignals,
    stop: StopHandle,
    wakeup: WakeupHandle,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ScheduleStore>, bus: Arc<dyn NotificationBus>, config: SchedulerConfig) -> Self {
        Self {
            store,
            bus,
            config,
            signals: ScheduleSignals::default(),
            stop: StopHandle::new(),
            wakeup: WakeupHandle::new(),
            handle: None,
        }
    }

    /// Registers a hook fired before a due schedule's `process()`. Must be
    /// called before `start()`.
    pub fn on_pre_execute<F>(&mut self, f: F)
    where
        F: Fn(&Schedule) + Send + Sync + 'static,
    {
        self.signals.on_pre_execute(f);
    }

    pub fn on_post_execute<F>(&mut self, f: F)
    where
        F: Fn(&Schedule) + Send + Sync + 'static,
    {
        self.signals.on_post_execute(f);
    }

    pub fn start(&mut self) {
        self.stop.reset();
        let inner = SchedulerLoop {
            store: self.store.clone(),
            config: self.config.clone(),
            signals: self.signals.clone(),
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

    pub async fn stop(&mut self) {
        self.stop.stop();
        self.signals.clear();
        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }

    /// External wakeup, e.g. from a remote notification or an out-of-band
    /// "a schedule just changed" signal.
    pub fn wakeup(&self) {
        self.wakeup.wakeup();
    }
}

struct SchedulerLoop {
    store: Arc<dyn ScheduleStore>,
    config: SchedulerConfig,
    signals: ScheduleSignals,
    stop: StopHandle,
    wakeup: WakeupHandle,
}

impl SchedulerLoop {
    async fn run(self) {
        info!("scheduler started");
        while !self.stop.is_stopped() {
            if let Err(err) = self.drain().await {
                warn!(error = %err, "scheduler drain phase failed, will retry next tick");
            }
            if let Some(ttl) = self.config.finished_ttl {
                match self
                    .store
                    .sweep_old(chrono::Duration::from_std(ttl).unwrap_or_default())
                    .await
                {
                    Ok(0) => debug!("no inactive schedules to sweep"),
                    Ok(n) => info!(count = n, "swept inactive schedules"),
                    Err(err) => warn!(error = %err, "schedule sweep failed"),
                }
            }
            if self.stop.is_stopped() {
                break;
            }
            sleep_until_woken(self.config.poll_interval, &self.stop, &self.wakeup).await;
        }
        info!("scheduler finished");
    }

    /// Repeatedly claims one due schedule until none remain. Because each
    /// claim re-queries "due now", a schedule whose freshly advanced
    /// `next_run_at` is still in the past (catch-up after downtime) is
    /// simply claimed again on the next iteration — no separate catch-up
    /// pass is needed.
    async fn drain(&self) -> anyhow::Result<()> {
        let executor = Advancer {
            signals: self.signals.clone(),
        };
        let mut fired = 0u32;
        loop {
            if self.stop.is_stopped() {
                break;
            }
            match self.store.claim_and_fire(&executor).await? {
                Some(FiredSchedule { schedule, task }) => {
                    fired += 1;
                    debug!(schedule_id = schedule.id, task_id = task.id, "fired a schedule");
                }
                None => break,
            }
        }
        if fired == 0 {
            debug!("no pending schedules");
        } else {
            info!(count = fired, "processed schedules");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::NoOpBus;
    use crate::schedule::EnqueueSchedule;
    use crate::task::{Task, TaskStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct StubScheduleStore {
        rows: AsyncMutex<Vec<Schedule>>,
        next_schedule_id: AtomicI64,
        next_task_id: AtomicI64,
    }

    #[async_trait]
    impl ScheduleStore for StubScheduleStore {
        async fn enqueue(&self, spec: EnqueueSchedule) -> anyhow::Result<Schedule> {
            spec.validate()?;
            let id = self.next_schedule_id.fetch_add(1, Ordering::SeqCst) + 1;
            let schedule = Schedule {
                id,
                name: spec.name,
                func: spec.func,
                args: spec.args,
                is_active: true,
                cron: spec.cron,
                interval_seconds: spec.interval.map(|d| d.num_seconds()),
                next_run_at: spec.next_run_at,
                last_run_at: None,
            };
            self.rows.lock().await.push(schedule.clone());
            Ok(schedule)
        }

        async fn claim_and_fire(
            &self,
            executor: &dyn ScheduleExecutor,
        ) -> anyhow::Result<Option<FiredSchedule>> {
            let mut rows = self.rows.lock().await;
            let now = Utc::now();
            let idx = rows.iter().position(|s| {
                s.is_active && s.next_run_at.is_none_or(|at| at < now)
            });
            let Some(idx) = idx else { return Ok(None) };
            let mut schedule = rows[idx].clone();
            let spec = executor.fire(&mut schedule, now)?;
            rows[idx] = schedule.clone();

            let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1;
            let task = Task {
                id: task_id,
                func: spec.func,
                args: spec.args,
                run_at: spec.run_at.unwrap_or(now),
                status: TaskStatus::Queued,
                started_at: None,
                finished_at: None,
                error: None,
                result: None,
            };
            Ok(Some(FiredSchedule { schedule, task }))
        }

        async fn sweep_old(&self, _ttl: chrono::Duration) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn interval_schedule_fires_and_reschedules() {
        let store = Arc::new(StubScheduleStore::default());
        store
            .enqueue(EnqueueSchedule::interval("m.tick", chrono::Duration::seconds(2)))
            .await
            .unwrap();

        let mut scheduler = Scheduler::new(
            store.clone() as Arc<dyn ScheduleStore>,
            Arc::new(NoOpBus),
            SchedulerConfig {
                poll_interval: Duration::from_millis(50),
                finished_ttl: None,
            },
        );
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop().await;

        let rows = store.rows.lock().await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].next_run_at.unwrap() > Utc::now());
        assert!(rows[0].is_active);
    }

    #[tokio::test]
    async fn one_shot_schedule_deactivates_after_firing() {
        let store = Arc::new(StubScheduleStore::default());
        store
            .enqueue(EnqueueSchedule::one_shot("m.once", Utc::now() - chrono::Duration::seconds(1)))
            .await
            .unwrap();

        let mut scheduler = Scheduler::new(
            store.clone() as Arc<dyn ScheduleStore>,
            Arc::new(NoOpBus),
            SchedulerConfig {
                poll_interval: Duration::from_millis(50),
                finished_ttl: None,
            },
        );
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.stop().await;

        let rows = store.rows.lock().await;
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_active);
    }

    #[tokio::test]
    async fn malformed_cron_deactivates_schedule() {
        let store = Arc::new(StubScheduleStore::default());
        store
            .enqueue(EnqueueSchedule::cron("m.bad", "not a cron"))
            .await
            .unwrap();

        let mut scheduler = Scheduler::new(
            store.clone() as Arc<dyn ScheduleStore>,
            Arc::new(NoOpBus),
            SchedulerConfig {
                poll_interval: Duration::from_millis(50),
                finished_ttl: None,
            },
        );
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.stop().await;

        let rows = store.rows.lock().await;
        assert!(!rows[0].is_active);
    }
}
