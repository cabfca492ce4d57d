//! The composite `{stop, wakeup}` sleep shared by the Worker, Scheduler,
//! and Leader Elector loops. Modeled as a select over two channels rather
//! than a bitmask condvar — the idiomatic async-Rust shape for the same
//! "sleep until told otherwise" behavior.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Cooperative shutdown: `stop()` is idempotent, and every waiter wakes
/// immediately.
#[derive(Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.is_stopped() {
            return;
        }
        self.notify.notified().await;
    }

    /// Resets the flag so a `StopHandle` can back a second `start()` call
    /// after a prior `stop()`.
    pub fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }
}

/// A one-shot, auto-resetting wakeup condition.
#[derive(Clone, Default)]
pub struct WakeupHandle {
    notify: Arc<Notify>,
}

impl WakeupHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: calling this any number of times before the next
    /// `wait()` only shortens that one wait.
    pub fn wakeup(&self) {
        self.notify.notify_one();
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Applies `poll_interval × (1 ± 0.05)` jitter to the timeout — jitter is
/// applied to the sleep, never to a task's `run_at`.
pub fn jittered_timeout(poll_interval: Duration) -> Duration {
    let base = poll_interval.as_secs_f64();
    let jitter = base * 0.05;
    let offset = jitter * (2.0 * fastrand::f64() - 1.0);
    Duration::from_secs_f64((base + offset).max(0.0))
}

/// Sleeps for `poll_interval` (jittered), returning early if either `stop`
/// or `wakeup` fires. A `wakeup` shortens only the *next* sleep once
/// consumed — it never retroactively shortens a wait already in
/// progress beyond the event's own latency.
pub async fn sleep_until_woken(poll_interval: Duration, stop: &StopHandle, wakeup: &WakeupHandle) {
    let timeout = jittered_timeout(poll_interval);
    tokio::select! {
        _ = tokio::time::sleep(timeout) => {}
        _ = stop.wait() => {}
        _ = wakeup.wait() => {}
    }
}
