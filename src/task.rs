// ABOUTME: Task definition, per-attempt execution, and retry accounting
// ABOUTME: Wraps an opaque user function with state, timeout, and attempt history

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::history::{AttemptStatus, ExecutionRecord};

/// Accumulated results of upstream tasks, passed to downstream functions.
pub type Context = Map<String, Value>;

pub type TaskFuture = BoxFuture<'static, anyhow::Result<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failure,
    Retrying,
}

impl TaskState {
    /// Terminal states accept no further attempts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Success => write!(f, "success"),
            TaskState::Failure => write!(f, "failure"),
            TaskState::Retrying => write!(f, "retrying"),
        }
    }
}

/// The unit of work a task wraps. Whether the function receives the
/// accumulated context is fixed at registration time; there is no runtime
/// signature inspection.
#[derive(Clone)]
pub enum TaskFn {
    NoContext(Arc<dyn Fn() -> TaskFuture + Send + Sync>),
    WithContext(Arc<dyn Fn(Context) -> TaskFuture + Send + Sync>),
}

impl TaskFn {
    pub fn no_context<F, Fut>(func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        TaskFn::NoContext(Arc::new(move || Box::pin(func())))
    }

    pub fn with_context<F, Fut>(func: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        TaskFn::WithContext(Arc::new(move |context| Box::pin(func(context))))
    }

    pub(crate) fn invoke(&self, context: Context) -> TaskFuture {
        match self {
            TaskFn::NoContext(func) => func(),
            TaskFn::WithContext(func) => func(context),
        }
    }
}

impl fmt::Debug for TaskFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFn::NoContext(_) => write!(f, "TaskFn::NoContext"),
            TaskFn::WithContext(_) => write!(f, "TaskFn::WithContext"),
        }
    }
}

/// Exponential backoff between retry attempts. Delays are honored
/// best-effort by the scheduler before a re-attempt is invoked.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry, 0-based: retry 0 waits `initial_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(retry.min(31) as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// How one attempt resolved, from the workflow's point of view. Retryable
/// attempts are rescheduled in a later wave; terminal faults fail the task.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Value),
    Retryable(String),
    Terminal(String),
}

/// A named unit of work plus its dependencies, retry budget, and run state.
/// All mutation happens on the orchestrating loop; worker futures only
/// invoke the wrapped function.
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    func: TaskFn,
    dependencies: Vec<String>,
    max_retries: u32,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
    state: TaskState,
    attempts: u32,
    result: Option<Value>,
    error: Option<String>,
    execution_records: Vec<ExecutionRecord>,
}

impl Task {
    pub fn new(name: impl Into<String>, func: TaskFn) -> Self {
        Self {
            name: name.into(),
            func,
            dependencies: Vec::new(),
            max_retries: 0,
            retry_policy: RetryPolicy::default(),
            timeout: None,
            state: TaskState::Pending,
            attempts: 0,
            result: None,
            error: None,
            execution_records: Vec::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Result of the most recent successful attempt.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Message of the most recent fault; cleared on success.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Append-only attempt history, retained across `reset()` and repeated
    /// workflow runs.
    pub fn execution_records(&self) -> &[ExecutionRecord] {
        &self.execution_records
    }

    pub(crate) fn func(&self) -> TaskFn {
        self.func.clone()
    }

    /// Run one attempt of the wrapped function and apply retry accounting.
    pub async fn execute(&mut self, context: Context) -> Outcome {
        self.begin_attempt();
        let started = Utc::now();
        let attempt = run_attempt(&self.name, self.func.clone(), context, self.timeout).await;
        self.complete_attempt(started, Utc::now(), attempt)
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.state = TaskState::Running;
        self.attempts += 1;
        debug!(task = %self.name, attempt = self.attempts, "task attempt started");
    }

    pub(crate) fn complete_attempt(
        &mut self,
        started: DateTime<Utc>,
        ended: DateTime<Utc>,
        attempt: Result<Value, String>,
    ) -> Outcome {
        match attempt {
            Ok(value) => {
                self.state = TaskState::Success;
                self.result = Some(value.clone());
                self.error = None;
                self.execution_records.push(ExecutionRecord {
                    start_time: started,
                    end_time: ended,
                    status: AttemptStatus::Success,
                });
                Outcome::Success(value)
            }
            Err(message) => {
                self.error = Some(message.clone());
                if self.attempts <= self.max_retries {
                    self.state = TaskState::Retrying;
                    self.execution_records.push(ExecutionRecord {
                        start_time: started,
                        end_time: ended,
                        status: AttemptStatus::Retry,
                    });
                    Outcome::Retryable(message)
                } else {
                    self.state = TaskState::Failure;
                    self.execution_records.push(ExecutionRecord {
                        start_time: started,
                        end_time: ended,
                        status: AttemptStatus::Failure,
                    });
                    Outcome::Terminal(message)
                }
            }
        }
    }

    /// Fail without invoking the function; used when an upstream dependency
    /// terminally failed. Leaves `attempts` and history untouched.
    pub(crate) fn mark_dependency_failed(&mut self, dependency: &str) {
        self.state = TaskState::Failure;
        self.error = Some(format!("dependency '{dependency}' failed"));
    }

    /// Return to `Pending` for a fresh run. Attempt history is kept.
    pub fn reset(&mut self) {
        self.state = TaskState::Pending;
        self.attempts = 0;
        self.result = None;
        self.error = None;
    }
}

/// Invoke a task function, bounding it by `limit` when set. A timeout elapse
/// is an ordinary fault for retry accounting. The dropped future stops at
/// its next await point; non-cooperative work is not forcibly killed.
pub(crate) async fn run_attempt(
    name: &str,
    func: TaskFn,
    context: Context,
    limit: Option<Duration>,
) -> Result<Value, String> {
    let invocation = func.invoke(context);
    match limit {
        Some(limit) => match timeout(limit, invocation).await {
            Ok(result) => result.map_err(|error| format!("{error:#}")),
            Err(_) => {
                warn!(task = %name, ?limit, "task attempt timed out");
                Err(format!("timed out after {limit:?}"))
            }
        },
        None => invocation.await.map_err(|error| format!("{error:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use serde_json::json;

    fn constant_task(value: Value) -> Task {
        Task::new(
            "constant",
            TaskFn::no_context(move || {
                let value = value.clone();
                async move { Ok(value) }
            }),
        )
    }

    #[tokio::test]
    async fn test_execute_success_sets_state_and_record() {
        let mut task = constant_task(json!({"answer": 42}));
        let outcome = task.execute(Context::new()).await;

        assert!(matches!(outcome, Outcome::Success(_)));
        assert_eq!(task.state(), TaskState::Success);
        assert_eq!(task.attempts(), 1);
        assert_eq!(task.result(), Some(&json!({"answer": 42})));
        assert!(task.error().is_none());
        assert_eq!(task.execution_records().len(), 1);
        assert_eq!(task.execution_records()[0].status, AttemptStatus::Success);
    }

    #[tokio::test]
    async fn test_execute_fault_is_retryable_within_budget() {
        let mut task = Task::new(
            "flaky",
            TaskFn::no_context(|| async { bail!("boom") }),
        )
        .with_max_retries(2);

        let outcome = task.execute(Context::new()).await;
        assert!(matches!(outcome, Outcome::Retryable(_)));
        assert_eq!(task.state(), TaskState::Retrying);
        assert_eq!(task.error(), Some("boom"));
        assert_eq!(task.execution_records()[0].status, AttemptStatus::Retry);
    }

    #[tokio::test]
    async fn test_execute_fault_is_terminal_when_budget_exhausted() {
        let mut task = Task::new("doomed", TaskFn::no_context(|| async { bail!("boom") }));

        let outcome = task.execute(Context::new()).await;
        assert!(matches!(outcome, Outcome::Terminal(_)));
        assert_eq!(task.state(), TaskState::Failure);
        assert_eq!(task.execution_records()[0].status, AttemptStatus::Failure);
    }

    #[tokio::test]
    async fn test_with_context_receives_upstream_results() {
        let mut task = Task::new(
            "reader",
            TaskFn::with_context(|context: Context| async move {
                let x = context.get("x").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!({"y": x + 1}))
            }),
        );

        let mut context = Context::new();
        context.insert("x".to_string(), json!(1));
        let outcome = task.execute(context).await;

        match outcome {
            Outcome::Success(value) => assert_eq!(value, json!({"y": 2})),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_faults_the_attempt() {
        let mut task = Task::new(
            "sleeper",
            TaskFn::no_context(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            }),
        )
        .with_timeout(Duration::from_millis(50));

        let started = std::time::Instant::now();
        let outcome = task.execute(Context::new()).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(outcome, Outcome::Terminal(_)));
        assert!(task.error().unwrap().contains("timed out"));
        // The record covers the elapsed portion, not the full sleep.
        assert!(task.execution_records()[0].duration() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_reset_keeps_history() {
        let mut task = constant_task(json!("done"));
        task.execute(Context::new()).await;
        task.reset();

        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.attempts(), 0);
        assert!(task.result().is_none());
        assert!(task.error().is_none());
        assert_eq!(task.execution_records().len(), 1);
    }

    #[test]
    fn test_retry_policy_backoff_and_clamp() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }
}
