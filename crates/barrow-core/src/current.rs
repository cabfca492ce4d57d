//! Ambient "current task" reference, so user code running inside a task
//! invocation can introspect the task it's running inside without
//! threading it through every call. Scoped to exactly the invocation via
//! task-local storage, with a narrow read-only accessor — no module-level
//! mutable singleton.

use std::future::Future;

use crate::task::Task;

tokio::task_local! {
    static CURRENT_TASK: Task;
}

/// Returns a clone of the task currently executing on this task, or
/// `None` outside of an invocation.
pub fn current() -> Option<Task> {
    CURRENT_TASK.try_with(|t| t.clone()).ok()
}

/// Runs `fut` with `task` installed as the ambient current task. The
/// scope is exactly the invocation: once `fut` resolves, the reference is
/// gone, matching the source's `finally: del _current_task.value`.
pub async fn scoped<F, T>(task: Task, fut: F) -> T
where
    F: Future<Output = T>,
{
    CURRENT_TASK.scope(task, fut).await
}
