//! Function registry and the public embedding API.
//!
//! A decorator that mutates the user's function object with
//! `.delay`/`.apply_async`/`.cancel` has no equivalent in a statically
//! typed language, so this instead hands back a plain wrapper value owning
//! the registered name and a handle to the store — registration by
//! `"<module>.<name>"` stays a pure string → callable lookup populated at
//! startup.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::BarrowError;
use crate::store::{TaskExecutor, TaskStore};
use crate::task::EnqueueTask;

/// The outcome of invoking a registered task body: `Ok` becomes the task's
/// `result`, `Err` becomes its formatted `error` text.
pub type TaskBodyResult = Result<Option<Value>, String>;

/// A registered task function: takes the task's `args` bag, returns a
/// JSON result or a formatted failure message.
pub trait TaskBody: Send + Sync {
    fn call(&self, args: Option<Value>) -> BoxFuture<'static, TaskBodyResult>;
}

impl<F, Fut> TaskBody for F
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = TaskBodyResult> + Send + 'static,
{
    fn call(&self, args: Option<Value>) -> BoxFuture<'static, TaskBodyResult> {
        Box::pin((self)(args))
    }
}

/// A string → callable lookup, populated explicitly at startup. Unknown
/// names fail as `ResolutionError` rather than attempting any
/// reflection over module paths.
#[derive(Clone, Default)]
pub struct Registry {
    bodies: Arc<DashMap<String, Arc<dyn TaskBody>>>,
    /// Set once, by `enable_sync_execution`, when `TASK_SYNC` is on. Shared
    /// with every `TaskHandle` this registry hands out so `delay`/
    /// `apply_async` can run a task inline as soon as it is registered,
    /// even though sync mode is usually enabled after registration.
    sync_executor: Arc<OnceLock<Arc<dyn TaskExecutor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `body` under `name` (conventionally `<module>.<name>`)
    /// and returns a `TaskHandle` bound to `store` for the public
    /// embedding API (`delay`/`apply_async`/`cancel`).
    pub fn register<T>(&self, name: impl Into<String>, body: T, store: Arc<dyn TaskStore>) -> TaskHandle
    where
        T: TaskBody + 'static,
    {
        let name = name.into();
        self.bodies.insert(name.clone(), Arc::new(body));
        TaskHandle {
            name,
            store,
            sync_executor: self.sync_executor.clone(),
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn TaskBody>, BarrowError> {
        self.bodies
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| BarrowError::ResolutionError(name.to_string()))
    }

    /// Switches every `TaskHandle` this registry has already handed out
    /// (and every one handed out later) into `TASK_SYNC` mode: `delay`/
    /// `apply_async` execute inline, in the enqueueing call, instead of
    /// waiting for a Worker to claim the row. Idempotent past the first
    /// call.
    pub fn enable_sync_execution(&self, executor: Arc<dyn TaskExecutor>) {
        let _ = self.sync_executor.set(executor);
    }
}

/// Owns a registered function's name and a handle to the store it
/// enqueues against. The Rust stand-in for the source's
/// `func.delay`/`func.apply_async`/`func.cancel`.
#[derive(Clone)]
pub struct TaskHandle {
    name: String,
    store: Arc<dyn TaskStore>,
    sync_executor: Arc<OnceLock<Arc<dyn TaskExecutor>>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `delay(**kwargs)`: enqueue now.
    pub async fn delay(&self, args: Option<Value>) -> anyhow::Result<crate::task::Task> {
        self.enqueue_or_run_inline(EnqueueTask {
            func: self.name.clone(),
            args,
            run_at: None,
        })
        .await
    }

    /// `apply_async(args=?, countdown=?, eta=?)`: enqueue with an optional
    /// delay or an absolute instant. `countdown` and `eta` are mutually
    /// exclusive.
    pub async fn apply_async(&self, opts: ApplyAsync) -> anyhow::Result<crate::task::Task> {
        if opts.countdown.is_some() && opts.eta.is_some() {
            return Err(BarrowError::ConfigError(
                "countdown and eta are mutually exclusive".into(),
            )
            .into());
        }
        let run_at = match (opts.countdown, opts.eta) {
            (Some(countdown), None) => Some(Utc::now() + countdown),
            (None, Some(eta)) => Some(eta),
            (None, None) => None,
            (Some(_), Some(_)) => unreachable!(),
        };
        self.enqueue_or_run_inline(EnqueueTask {
            func: self.name.clone(),
            args: opts.args,
            run_at,
        })
        .await
    }

    /// `cancel(**kwargs)`: delete matching queued rows, returning whether
    /// any were removed.
    pub async fn cancel(&self, args_match: Value) -> anyhow::Result<bool> {
        self.store.cancel(&self.name, args_match).await
    }

    /// Under `TASK_SYNC`, enqueues then immediately runs the row in the
    /// same call via `run_synchronously`, rejecting a future `run_at`
    /// since there is no one left to wait for it. Otherwise, a plain
    /// enqueue.
    async fn enqueue_or_run_inline(&self, spec: EnqueueTask) -> anyhow::Result<crate::task::Task> {
        match self.sync_executor.get() {
            Some(executor) => {
                if spec.run_at.is_some() {
                    return Err(BarrowError::ConfigError(
                        "TASK_SYNC rejects tasks enqueued with a future run_at".into(),
                    )
                    .into());
                }
                let task = self.store.enqueue(spec).await?;
                self.store.run_synchronously(task.id, executor.as_ref()).await
            }
            None => self.store.enqueue(spec).await,
        }
    }
}

/// Options for `TaskHandle::apply_async`.
#[derive(Debug, Clone, Default)]
pub struct ApplyAsync {
    pub args: Option<Value>,
    pub countdown: Option<ChronoDuration>,
    pub eta: Option<DateTime<Utc>>,
}

/// Adapts the `Registry`'s lookup into the `TaskExecutor` trait object the
/// store's `claim_and_execute` expects (see `store.rs`). The Worker that
/// owns this executor wraps it to fire `pre_task_execute`/
/// `post_task_execute`; this type only resolves and invokes the body.
pub struct RegistryExecutor {
    pub registry: Registry,
}

#[async_trait]
impl crate::store::TaskExecutor for RegistryExecutor {
    async fn execute(&self, task: &crate::task::Task) -> crate::task::TaskOutcome {
        let body = match self.registry.resolve(&task.func) {
            Ok(body) => body,
            Err(err @ BarrowError::ResolutionError(_)) => {
                return crate::task::TaskOutcome::Failure(err.to_string());
            }
            Err(_) => unreachable!("resolve only ever returns ResolutionError"),
        };

        let outcome = crate::current::scoped(task.clone(), body.call(task.args.clone())).await;
        match outcome {
            Ok(result) => crate::task::TaskOutcome::Success(result),
            Err(message) => crate::task::TaskOutcome::Failure(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as at;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        enqueued: Mutex<Vec<EnqueueTask>>,
    }

    #[at]
    impl TaskStore for FakeStore {
        async fn enqueue(&self, spec: EnqueueTask) -> anyhow::Result<crate::task::Task> {
            let task = crate::task::Task {
                id: 1,
                func: spec.func.clone(),
                args: spec.args.clone(),
                run_at: spec.run_at.unwrap_or_else(Utc::now),
                status: crate::task::TaskStatus::Queued,
                started_at: None,
                finished_at: None,
                error: None,
                result: None,
            };
            self.enqueued.lock().unwrap().push(spec);
            Ok(task)
        }

        async fn claim_and_execute(
            &self,
            _worker_id: &str,
            _executor: &dyn crate::store::TaskExecutor,
        ) -> anyhow::Result<Option<crate::task::Task>> {
            Ok(None)
        }

        async fn run_synchronously(
            &self,
            _task_id: i64,
            _executor: &dyn crate::store::TaskExecutor,
        ) -> anyhow::Result<crate::task::Task> {
            unimplemented!()
        }

        async fn sweep_old(&self, _ttl: ChronoDuration) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn cancel(&self, _func: &str, _args_match: Value) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn delay_enqueues_with_no_run_at() {
        let store: Arc<dyn TaskStore> = Arc::new(FakeStore::default());
        let registry = Registry::new();
        let handle = registry.register(
            "m.echo",
            |args: Option<Value>| async move { Ok(args) },
            store,
        );

        let task = handle.delay(Some(json!({"x": 1}))).await.unwrap();
        assert_eq!(task.func, "m.echo");
        assert_eq!(task.args, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn apply_async_rejects_countdown_and_eta_together() {
        let store: Arc<dyn TaskStore> = Arc::new(FakeStore::default());
        let registry = Registry::new();
        let handle = registry.register("m.echo", |args| async move { Ok(args) }, store);

        let result = handle
            .apply_async(ApplyAsync {
                args: None,
                countdown: Some(ChronoDuration::seconds(5)),
                eta: Some(Utc::now()),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unresolved_function_is_resolution_error() {
        let registry = Registry::new();
        let err = registry.resolve("missing.func").unwrap_err();
        assert!(matches!(err, BarrowError::ResolutionError(name) if name == "missing.func"));
    }

    #[tokio::test]
    async fn registry_executor_records_success() {
        let registry = Registry::new();
        let store: Arc<dyn TaskStore> = Arc::new(FakeStore::default());
        registry.register("m.echo", |args: Option<Value>| async move { Ok(args) }, store);

        let executor = RegistryExecutor { registry };
        let task = crate::task::Task {
            id: 1,
            func: "m.echo".into(),
            args: Some(json!({"x": 1})),
            run_at: Utc::now(),
            status: crate::task::TaskStatus::Queued,
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        };
        match crate::store::TaskExecutor::execute(&executor, &task).await {
            crate::task::TaskOutcome::Success(result) => assert_eq!(result, Some(json!({"x": 1}))),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registry_executor_records_resolution_error_as_failure() {
        let executor = RegistryExecutor {
            registry: Registry::new(),
        };
        let task = crate::task::Task {
            id: 1,
            func: "missing.func".into(),
            args: None,
            run_at: Utc::now(),
            status: crate::task::TaskStatus::Queued,
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        };
        match crate::store::TaskExecutor::execute(&executor, &task).await {
            crate::task::TaskOutcome::Failure(message) => {
                assert!(message.contains("missing.func"))
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
