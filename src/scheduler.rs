// ABOUTME: Semaphore-bounded concurrent execution of one wave of task attempts
// ABOUTME: Applies retry-delay pacing and per-attempt timeouts inside worker futures

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error};

use crate::task::{run_attempt, Context, TaskFn};

/// One attempt prepared by the workflow loop. Task state was already
/// advanced on the orchestrating thread; workers only run the function.
pub(crate) struct PreparedAttempt {
    pub task_name: String,
    pub func: TaskFn,
    pub context: Context,
    pub timeout: Option<Duration>,
    pub retry_delay: Option<Duration>,
}

/// What came back from a worker, timestamped around the actual invocation.
pub(crate) struct AttemptResult {
    pub task_name: String,
    pub started: DateTime<Utc>,
    pub ended: DateTime<Utc>,
    pub outcome: Result<Value, String>,
}

pub(crate) struct TaskScheduler {
    semaphore: Arc<Semaphore>,
}

impl TaskScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Run every attempt of the wave concurrently and wait for all of them.
    /// A failure never aborts its siblings; the wave always drains fully.
    pub async fn execute_wave(&self, attempts: Vec<PreparedAttempt>) -> Vec<AttemptResult> {
        let handles: Vec<_> = attempts
            .into_iter()
            .map(|attempt| {
                let semaphore = Arc::clone(&self.semaphore);
                let name = attempt.task_name.clone();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");

                    if let Some(delay) = attempt.retry_delay {
                        debug!(task = %attempt.task_name, ?delay, "waiting before retry");
                        sleep(delay).await;
                    }

                    let started = Utc::now();
                    let outcome = run_attempt(
                        &attempt.task_name,
                        attempt.func,
                        attempt.context,
                        attempt.timeout,
                    )
                    .await;

                    AttemptResult {
                        task_name: attempt.task_name,
                        started,
                        ended: Utc::now(),
                        outcome,
                    }
                });
                (name, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_error) => {
                    error!(task = %name, %join_error, "task worker panicked");
                    let now = Utc::now();
                    results.push(AttemptResult {
                        task_name: name,
                        started: now,
                        ended: now,
                        outcome: Err(format!("worker panicked: {join_error}")),
                    });
                }
            }
        }
        results
    }
}
