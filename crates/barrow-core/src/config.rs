//! Configuration. A plain struct tree a hosting application populates
//! however it likes — env, file, or hard-coded defaults. There is
//! deliberately no settings-module glue here: reading environment
//! variables or config files is the hosting application's job, not this
//! crate's.

use std::time::Duration;

use crate::error::BarrowError;

/// Worker tuning parameters.
///
/// `TASK_SYNC` is conspicuously absent here: it governs how a task is
/// enqueued (inline vs. deferred to a worker), so it lives on
/// `Registry`/`TaskHandle` (`Registry::enable_sync_execution`) rather than
/// on the component that drains the queue.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `TASK_POLL_INTERVAL`.
    pub poll_interval: Duration,
    /// `TASK_FINISHED_TTL`.
    pub finished_ttl: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            finished_ttl: None,
        }
    }
}

/// Scheduler tuning parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub finished_ttl: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            finished_ttl: None,
        }
    }
}

/// Leader Elector parameters.
#[derive(Debug, Clone)]
pub struct ElectorConfig {
    pub heartbeat_interval: Duration,
    pub lease_ttl: Duration,
}

impl Default for ElectorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(30),
        }
    }
}

impl ElectorConfig {
    /// `lease_ttl ≥ 3 × heartbeat_interval` is required so a stalled
    /// leader is detected before its lease expires elsewhere.
    pub fn validate(&self) -> Result<(), BarrowError> {
        if self.lease_ttl < self.heartbeat_interval * 3 {
            return Err(BarrowError::ConfigError(format!(
                "lease_ttl ({:?}) must be at least 3x heartbeat_interval ({:?})",
                self.lease_ttl, self.heartbeat_interval
            )));
        }
        Ok(())
    }
}

/// Notification bus tuning parameters (`BUS_ENABLED`, `BUS_CHANNEL`).
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub enabled: bool,
    /// `%(app)s`/`%(model)s` placeholders rendered by
    /// `Notification::channel_name`; passed into `PgNotificationBus::connect`
    /// to control the `LISTEN`/`NOTIFY` channel names on the wire.
    pub channel_template: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_template: "barrow_%(app)s_%(model)s".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_match_documented_values() {
        let worker = WorkerConfig::default();
        assert_eq!(worker.poll_interval, Duration::from_secs(30));
        assert!(worker.finished_ttl.is_none());

        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.poll_interval, Duration::from_secs(60));

        let bus = BusConfig::default();
        assert!(!bus.enabled);
    }

    #[test]
    fn elector_rejects_too_short_lease() {
        let cfg = ElectorConfig {
            heartbeat_interval: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(10),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn elector_accepts_default() {
        assert!(ElectorConfig::default().validate().is_ok());
    }
}
