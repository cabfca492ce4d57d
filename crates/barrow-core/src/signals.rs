//! Typed event hooks (`pre_task_execute`, `post_task_execute`,
//! `pre_schedule_execute`, `post_schedule_execute`) fired around a Worker's
//! or Scheduler's invocation of a claimed row.
//!
//! A global, process-wide signal dispatcher doesn't fit a library meant to
//! be embedded and torn down repeatedly (tests spin up and stop many
//! Workers in one process), so each component owns its own typed registry,
//! populated before `start()`.

use std::sync::Arc;

use crate::schedule::Schedule;
use crate::task::Task;

type TaskHook = Arc<dyn Fn(&Task) + Send + Sync>;
type TaskOutcomeHook = Arc<dyn Fn(&Task, Option<&str>) + Send + Sync>;
type ScheduleHook = Arc<dyn Fn(&Schedule) + Send + Sync>;

/// Hooks a Worker fires around each claimed task's invocation.
#[derive(Clone, Default)]
pub struct TaskSignals {
    pre: Vec<TaskHook>,
    post: Vec<TaskOutcomeHook>,
}

impl TaskSignals {
    pub fn on_pre_execute<F>(&mut self, f: F)
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.pre.push(Arc::new(f));
    }

    /// `error` is `Some(formatted trace)` on failure, `None` on success.
    pub fn on_post_execute<F>(&mut self, f: F)
    where
        F: Fn(&Task, Option<&str>) + Send + Sync + 'static,
    {
        self.post.push(Arc::new(f));
    }

    pub fn fire_pre(&self, task: &Task) {
        for hook in &self.pre {
            hook(task);
        }
    }

    pub fn fire_post(&self, task: &Task, error: Option<&str>) {
        for hook in &self.post {
            hook(task, error);
        }
    }

    /// Unregisters every hook. Called on `stop()` so handlers registered
    /// for one process generation cannot dangle into the next.
    pub fn clear(&mut self) {
        self.pre.clear();
        self.post.clear();
    }
}

/// Hooks a Scheduler fires around each due schedule's processing.
#[derive(Clone, Default)]
pub struct ScheduleSignals {
    pre: Vec<ScheduleHook>,
    post: Vec<ScheduleHook>,
}

impl ScheduleSignals {
    pub fn on_pre_execute<F>(&mut self, f: F)
    where
        F: Fn(&Schedule) + Send + Sync + 'static,
    {
        self.pre.push(Arc::new(f));
    }

    pub fn on_post_execute<F>(&mut self, f: F)
    where
        F: Fn(&Schedule) + Send + Sync + 'static,
    {
        self.post.push(Arc::new(f));
    }

    pub fn fire_pre(&self, schedule: &Schedule) {
        for hook in &self.pre {
            hook(schedule);
        }
    }

    pub fn fire_post(&self, schedule: &Schedule) {
        for hook in &self.post {
            hook(schedule);
        }
    }

    pub fn clear(&mut self) {
        self.pre.clear();
        self.post.clear();
    }
}
