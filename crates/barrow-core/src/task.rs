//! The `Task` data model: one pending, running, or terminal
//! unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `status ∈ {QUEUED, DONE, FAILED}`, terminal states never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Queued,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

/// A persisted, single-shot unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    /// Symbolic name `<module>.<name>` of a registered function.
    pub func: String,
    pub args: Option<Value>,
    pub run_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

impl Task {
    /// `status=QUEUED ⇒ started_at=null, finished_at=null`.
    pub fn invariant_holds(&self) -> bool {
        match self.status {
            TaskStatus::Queued => self.started_at.is_none() && self.finished_at.is_none(),
            TaskStatus::Done | TaskStatus::Failed => {
                match (self.started_at, self.finished_at) {
                    (Some(started), Some(finished)) => finished >= started,
                    _ => false,
                }
            }
        }
    }
}

/// Parameters for `TaskStore::enqueue`.
#[derive(Debug, Clone)]
pub struct EnqueueTask {
    pub func: String,
    pub args: Option<Value>,
    /// Eligibility instant; `None` defaults to "now" at insert time.
    pub run_at: Option<DateTime<Utc>>,
}

impl EnqueueTask {
    pub fn new(func: impl Into<String>) -> Self {
        Self {
            func: func.into(),
            args: None,
            run_at: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }
}

/// What a claimed task's invocation produced; passed to `Finish`.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success(Option<Value>),
    Failure(String),
}

/// Returns true iff every key in `filter` is present in `args` with an
/// equal value (extra keys in `args` are ignored). This is the JSON-subset
/// matching rule `TaskStore::cancel` uses to pick which queued rows to
/// remove: a caller filters by the keyword arguments it cares about and
/// leaves the rest unconstrained.
pub fn args_match_subset(args: &Option<Value>, filter: &Value) -> bool {
    let empty = serde_json::Map::new();
    let args = match args {
        Some(Value::Object(map)) => map,
        Some(_) | None => &empty,
    };
    let Some(filter) = filter.as_object() else {
        return false;
    };
    filter.iter().all(|(k, v)| args.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queued_task_satisfies_invariant() {
        let task = Task {
            id: 1,
            func: "m.f".into(),
            args: None,
            run_at: Utc::now(),
            status: TaskStatus::Queued,
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        };
        assert!(task.invariant_holds());
    }

    #[test]
    fn done_task_requires_finished_after_started() {
        let now = Utc::now();
        let task = Task {
            id: 1,
            func: "m.f".into(),
            args: None,
            run_at: now,
            status: TaskStatus::Done,
            started_at: Some(now),
            finished_at: Some(now + chrono::Duration::seconds(1)),
            error: None,
            result: None,
        };
        assert!(task.invariant_holds());
    }

    #[test]
    fn subset_match_ignores_extra_keys() {
        let args = Some(json!({"a": 1, "b": 3}));
        assert!(args_match_subset(&args, &json!({"a": 1})));
        assert!(!args_match_subset(&args, &json!({"a": 2})));
        assert!(!args_match_subset(&args, &json!({"c": 1})));
    }

    #[test]
    fn cancel_filter_matches_only_the_task_with_all_given_keys() {
        // Two queued tasks: f(a=1,b=3) and f(a=2,b=4).
        let t1 = Some(json!({"a": 1, "b": 3}));
        let t2 = Some(json!({"a": 2, "b": 4}));

        // cancel(a=1, b=4) matches neither.
        let filter = json!({"a": 1, "b": 4});
        assert!(!args_match_subset(&t1, &filter));
        assert!(!args_match_subset(&t2, &filter));

        // cancel(a=2, b=4) matches only the second.
        let filter = json!({"a": 2, "b": 4});
        assert!(!args_match_subset(&t1, &filter));
        assert!(args_match_subset(&t2, &filter));
    }
}
