//! The Leader Elector: rotten-lease distributed locking
//! over a single named row, exposing an observable leader/follower signal
//! a supervisor uses to start/stop the Scheduler component.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ElectorConfig;
use crate::error::BarrowError;
use crate::lifecycle::StopHandle;
use crate::lock::AcquireOutcome;
use crate::store::LockStore;

/// `Follower ⇌ Leader`, with edges emitted only on transitions — an
/// idempotent heartbeat success never re-emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    Follower,
    Leader,
}

type EdgeHook = Arc<dyn Fn() + Send + Sync>;

/// A long-running component holding (or contesting) a named lease.
pub struct LeaderElector {
    name: String,
    owner: Uuid,
    store: Arc<dyn LockStore>,
    config: ElectorConfig,
    stop: StopHandle,
    on_acquired: Vec<EdgeHook>,
    on_released: Vec<EdgeHook>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl LeaderElector {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn LockStore>,
        config: ElectorConfig,
    ) -> Result<Self, BarrowError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            owner: Uuid::new_v4(),
            store,
            config,
            stop: StopHandle::new(),
            on_acquired: Vec::new(),
            on_released: Vec::new(),
            handle: None,
        })
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Fired on every `Follower -> Leader` transition. Registered before
    /// `start()`.
    pub fn on_leader_acquired<F>(&mut self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_acquired.push(Arc::new(f));
    }

    /// Fired on every `Leader -> Follower` transition, including the final
    /// demotion on `stop()` if the process was leading.
    pub fn on_leader_released<F>(&mut self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_released.push(Arc::new(f));
    }

    pub fn start(&mut self) {
        self.stop.reset();
        let inner = ElectorLoop {
            name: self.name.clone(),
            owner: self.owner,
            store: self.store.clone(),
            config: self.config.clone(),
            stop: self.stop.clone(),
            on_acquired: self.on_acquired.clone(),
            on_released: self.on_released.clone(),
        };
        self.handle = Some(tokio::spawn(inner.run()));
    }

    pub async fn stop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
        }
    }
}

struct ElectorLoop {
    name: String,
    owner: Uuid,
    store: Arc<dyn LockStore>,
    config: ElectorConfig,
    stop: StopHandle,
    on_acquired: Vec<EdgeHook>,
    on_released: Vec<EdgeHook>,
}

impl ElectorLoop {
    fn emit_acquired(&self) {
        info!(lock = %self.name, owner = %self.owner, "leader-acquired");
        for hook in &self.on_acquired {
            hook();
        }
    }

    fn emit_released(&self) {
        info!(lock = %self.name, owner = %self.owner, "leader-released");
        for hook in &self.on_released {
            hook();
        }
    }

    async fn run(self) {
        info!(lock = %self.name, "elector started");
        let mut state = LeaderState::Follower;
        let mut locked_at: Option<DateTime<Utc>> = None;

        while !self.stop.is_stopped() {
            match state {
                LeaderState::Follower => {
                    match self
                        .store
                        .try_acquire(
                            &self.name,
                            self.owner,
                            chrono::Duration::from_std(self.config.lease_ttl).unwrap_or_default(),
                        )
                        .await
                    {
                        Ok(AcquireOutcome::Acquired { locked_at: at }) => {
                            state = LeaderState::Leader;
                            locked_at = Some(at);
                            self.emit_acquired();
                        }
                        Ok(AcquireOutcome::HeldByOther) => {}
                        Err(err) => warn!(lock = %self.name, error = %err, "try_acquire failed"),
                    }
                }
                LeaderState::Leader => {
                    let expected = locked_at.expect("locked_at set when entering Leader");
                    match self.store.confirm(&self.name, self.owner, expected).await {
                        Ok(Some(new_locked_at)) => locked_at = Some(new_locked_at),
                        Ok(None) => {
                            state = LeaderState::Follower;
                            locked_at = None;
                            self.emit_released();
                        }
                        Err(err) => warn!(lock = %self.name, error = %err, "confirm failed"),
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.heartbeat_interval) => {}
                _ = self.stop.wait() => {}
            }
        }

        if state == LeaderState::Leader {
            if let Some(expected) = locked_at {
                match self.store.release(&self.name, self.owner, expected).await {
                    Ok(true) => {}
                    Ok(false) => warn!(lock = %self.name, "release affected no rows; lease had already moved"),
                    Err(err) => warn!(lock = %self.name, error = %err, "release failed"),
                }
            }
            self.emit_released();
        }
        info!(lock = %self.name, "elector finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Lease;
    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct StubLockStore {
        lease: AsyncMutex<Option<Lease>>,
    }

    #[async_trait]
    impl LockStore for StubLockStore {
        async fn try_acquire(
            &self,
            name: &str,
            me: Uuid,
            lease_ttl: chrono::Duration,
        ) -> anyhow::Result<AcquireOutcome> {
            let mut guard = self.lease.lock().await;
            let now = Utc::now();
            match guard.as_ref() {
                None => {
                    *guard = Some(Lease {
                        name: name.into(),
                        owner: Some(me),
                        locked_at: Some(now),
                    });
                    Ok(AcquireOutcome::Acquired { locked_at: now })
                }
                Some(lease) if lease.is_expired(now, lease_ttl) => {
                    *guard = Some(Lease {
                        name: name.into(),
                        owner: Some(me),
                        locked_at: Some(now),
                    });
                    Ok(AcquireOutcome::Acquired { locked_at: now })
                }
                Some(_) => Ok(AcquireOutcome::HeldByOther),
            }
        }

        async fn confirm(
            &self,
            _name: &str,
            me: Uuid,
            locked_at_expected: DateTime<Utc>,
        ) -> anyhow::Result<Option<DateTime<Utc>>> {
            let mut guard = self.lease.lock().await;
            match guard.as_mut() {
                Some(lease) if lease.owner == Some(me) && lease.locked_at == Some(locked_at_expected) => {
                    let now = Utc::now();
                    lease.locked_at = Some(now);
                    Ok(Some(now))
                }
                _ => Ok(None),
            }
        }

        async fn release(
            &self,
            _name: &str,
            me: Uuid,
            locked_at_expected: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            let mut guard = self.lease.lock().await;
            match guard.as_mut() {
                Some(lease) if lease.owner == Some(me) && lease.locked_at == Some(locked_at_expected) => {
                    lease.owner = None;
                    lease.locked_at = None;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    #[test]
    fn rejects_lease_ttl_shorter_than_3x_heartbeat() {
        let store: Arc<dyn LockStore> = Arc::new(StubLockStore::default());
        let config = ElectorConfig {
            heartbeat_interval: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(6),
        };
        assert!(LeaderElector::new("scheduler", store, config).is_err());
    }

    #[tokio::test]
    async fn solo_elector_acquires_and_emits_once() {
        let store: Arc<dyn LockStore> = Arc::new(StubLockStore::default());
        let config = ElectorConfig {
            heartbeat_interval: Duration::from_millis(20),
            lease_ttl: Duration::from_millis(100),
        };
        let acquired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut elector = LeaderElector::new("scheduler", store, config).unwrap();
        {
            let acquired = acquired.clone();
            elector.on_leader_acquired(move || {
                acquired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });
        }
        elector.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        elector.stop().await;

        assert_eq!(acquired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn crashed_leader_without_release_loses_lease_only_after_ttl_expiry() {
        // A crashed leader never runs ElectorLoop's graceful-shutdown
        // release branch, so it is modeled here by acquiring the lease
        // directly against the store — no LeaderElector, no stop(), no
        // release call at all — and leaving it held. A fresh elector must
        // not take over until the lease goes rotten past `lease_ttl`.
        let store: Arc<dyn LockStore> = Arc::new(StubLockStore::default());
        let config = ElectorConfig {
            heartbeat_interval: Duration::from_millis(20),
            lease_ttl: Duration::from_millis(80),
        };
        store
            .try_acquire(
                "scheduler",
                Uuid::new_v4(),
                chrono::Duration::from_std(config.lease_ttl).unwrap(),
            )
            .await
            .unwrap();

        let acquired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut elector = LeaderElector::new("scheduler", store, config).unwrap();
        {
            let acquired = acquired.clone();
            elector.on_leader_acquired(move || {
                acquired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });
        }
        elector.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            acquired.load(std::sync::atomic::Ordering::SeqCst),
            0,
            "lease is not yet rotten"
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        elector.stop().await;

        assert_eq!(acquired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
