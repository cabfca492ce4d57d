//! `barrow-core`: the backend-agnostic coordination core of barrow, a
//! durable task queue and periodic scheduler over a relational store.
//!
//! This crate owns the data model, the store traits a PostgreSQL or
//! SQLite backend implements, and the three long-running components that
//! drive the system — [`worker::Worker`], [`scheduler::Scheduler`], and
//! [`elector::LeaderElector`] — plus the public embedding API
//! ([`registry::Registry`]/[`registry::TaskHandle`]) a hosting application
//! registers functions against.

pub mod bus;
pub mod config;
pub mod cron;
pub mod current;
pub mod elector;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod signals;
pub mod store;
pub mod task;
pub mod worker;

pub use bus::{NoOpBus, NotificationBus, Notification, NotifyEvent};
pub use config::{BusConfig, ElectorConfig, SchedulerConfig, WorkerConfig};
pub use elector::{LeaderElector, LeaderState};
pub use error::BarrowError;
pub use lock::{AcquireOutcome, Lease};
pub use registry::{ApplyAsync, Registry, RegistryExecutor, TaskBody, TaskHandle};
pub use schedule::{EnqueueSchedule, FiringPolicy, Schedule};
pub use scheduler::Scheduler;
pub use store::{FiredSchedule, LockStore, ScheduleExecutor, ScheduleStore, TaskExecutor, TaskStore};
pub use task::{EnqueueTask, Task, TaskOutcome, TaskStatus};
pub use worker::Worker;
