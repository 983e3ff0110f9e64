// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides canned task functions for exercising the engine

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use anyhow::bail;
use serde_json::Value;
use trellis::{RetryPolicy, Task, TaskFn};

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("trellis=debug")
            .with_test_writer()
            .try_init();
    });
}

/// Retry policy with delays small enough to keep test runs fast.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(5),
        backoff_multiplier: 1.0,
        max_delay: Duration::from_millis(5),
    }
}

/// Task that returns a fixed value.
pub fn value_task(name: &str, value: Value) -> Task {
    Task::new(
        name,
        TaskFn::no_context(move || {
            let value = value.clone();
            async move { Ok(value) }
        }),
    )
}

/// Task that counts its invocations and returns null.
pub fn counting_task(name: &str, counter: Arc<AtomicU32>) -> Task {
    Task::new(
        name,
        TaskFn::no_context(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Value::Null) }
        }),
    )
}

/// Task that counts its invocations and always faults.
pub fn failing_task(name: &str, counter: Arc<AtomicU32>) -> Task {
    let task_name = name.to_string();
    Task::new(
        name,
        TaskFn::no_context(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let task_name = task_name.clone();
            async move { bail!("{task_name} exploded") }
        }),
    )
    .with_retry_policy(fast_retry_policy())
}

/// Task that sleeps for the given duration, then returns null.
pub fn sleeping_task(name: &str, delay: Duration) -> Task {
    Task::new(
        name,
        TaskFn::no_context(move || async move {
            tokio::time::sleep(delay).await;
            Ok(Value::Null)
        }),
    )
}

/// Task that faults until it has been invoked `failures` times, then
/// succeeds with the given value.
pub fn flaky_task(name: &str, failures: u32, value: Value, counter: Arc<AtomicU32>) -> Task {
    Task::new(
        name,
        TaskFn::no_context(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let value = value.clone();
            async move {
                if attempt <= failures {
                    bail!("transient fault on attempt {attempt}");
                }
                Ok(value)
            }
        }),
    )
    .with_retry_policy(fast_retry_policy())
}
