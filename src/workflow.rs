// ABOUTME: Workflow orchestration: task registry, graph validation, and the wave loop
// ABOUTME: The loop alone mutates task state; each run owns its own scheduler

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::dependency::DependencyGraph;
use crate::error::{Result, WorkflowError};
use crate::history::{TaskExecutionInfo, WorkflowExecution, WorkflowStatus};
use crate::schedule::Schedule;
use crate::scheduler::{PreparedAttempt, TaskScheduler};
use crate::task::{Context, Outcome, Task, TaskState};

/// How `run()` treats state left over from a previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Every task starts from `Pending`; prior results are discarded.
    #[default]
    Fresh,
    /// Tasks already `Success` keep their results and are not re-run.
    Resume,
}

/// A named collection of tasks and their dependency edges. Validates the
/// graph, drives concurrent wave-by-wave execution, and keeps an append-only
/// history of runs.
pub struct Workflow {
    name: String,
    tasks: IndexMap<String, Task>,
    schedule: Option<Schedule>,
    execution_history: Vec<WorkflowExecution>,
    max_concurrent: Option<usize>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: IndexMap::new(),
            schedule: None,
            execution_history: Vec::new(),
            max_concurrent: None,
        }
    }

    /// Cap within-wave parallelism. Unset means every ready task of a wave
    /// runs at once.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Every completed run, oldest first. Never pruned by the engine.
    pub fn execution_history(&self) -> &[WorkflowExecution] {
        &self.execution_history
    }

    pub fn set_schedule(&mut self, schedule: Schedule) {
        self.schedule = Some(schedule);
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    /// The driver updates `last_run` here after it triggers a run.
    pub fn schedule_mut(&mut self) -> Option<&mut Schedule> {
        self.schedule.as_mut()
    }

    /// Whether the associated schedule says a run is due. A workflow without
    /// a schedule runs on demand.
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        match &self.schedule {
            Some(schedule) => schedule.should_run(now),
            None => true,
        }
    }

    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(task.name()) {
            return Err(WorkflowError::DuplicateTask {
                name: task.name().to_string(),
            });
        }
        self.tasks.insert(task.name().to_string(), task);
        Ok(())
    }

    /// Check the graph for missing dependency names and cycles. Idempotent;
    /// `run()` always validates before executing anything.
    pub fn validate(&self) -> Result<()> {
        DependencyGraph::from_tasks(&self.tasks)?.check_cycles()
    }

    /// Result of the most recent successful attempt of a task, if any.
    pub fn get_task_result(&self, name: &str) -> Option<&Value> {
        self.tasks.get(name).and_then(|task| task.result())
    }

    /// Run the whole workflow from scratch. See [`Workflow::run_with_mode`].
    pub async fn run(&mut self) -> Result<IndexMap<String, Value>> {
        self.run_with_mode(RunMode::Fresh).await
    }

    /// Execute the graph wave by wave: all ready tasks of a wave run
    /// concurrently, the wave drains fully, failures propagate to
    /// dependents, and retrying tasks are resubmitted in a later wave.
    ///
    /// On full success the results of every task are returned. Any terminal
    /// task failure makes the run return `WorkflowError::TaskFailed` after
    /// the execution record has been appended to history.
    #[instrument(skip(self, mode), fields(workflow = %self.name))]
    pub async fn run_with_mode(&mut self, mode: RunMode) -> Result<IndexMap<String, Value>> {
        let graph = DependencyGraph::from_tasks(&self.tasks)?;
        graph.check_cycles()?;

        let run_id = Uuid::new_v4().to_string();
        let started = Utc::now();
        info!(%run_id, tasks = self.tasks.len(), "workflow started");

        for task in self.tasks.values_mut() {
            if mode == RunMode::Resume && task.state() == TaskState::Success {
                continue;
            }
            task.reset();
        }

        let scheduler = TaskScheduler::new(
            self.max_concurrent
                .unwrap_or_else(|| self.tasks.len().max(1)),
        );

        let loop_result = self.run_waves(&graph, &scheduler).await;

        let failed = self
            .tasks
            .values()
            .find(|task| task.state() == TaskState::Failure)
            .map(|task| {
                (
                    task.name().to_string(),
                    task.error().unwrap_or("unknown error").to_string(),
                )
            });

        let status = if failed.is_some() || loop_result.is_err() {
            WorkflowStatus::Failure
        } else {
            WorkflowStatus::Success
        };

        let mut task_executions = HashMap::new();
        for (name, task) in &self.tasks {
            if let Some(record) = task.execution_records().last() {
                task_executions.insert(name.clone(), TaskExecutionInfo::from_record(name, record));
            }
        }

        self.execution_history.push(WorkflowExecution {
            workflow_name: self.name.clone(),
            run_id,
            start_time: started,
            end_time: Utc::now(),
            status,
            task_executions,
        });

        loop_result?;

        if let Some((task, message)) = failed {
            error!(%task, "workflow failed");
            return Err(WorkflowError::TaskFailed { task, message });
        }

        info!("workflow completed successfully");
        Ok(self
            .tasks
            .iter()
            .map(|(name, task)| {
                (
                    name.clone(),
                    task.result().cloned().unwrap_or(Value::Null),
                )
            })
            .collect())
    }

    async fn run_waves(&mut self, graph: &DependencyGraph, scheduler: &TaskScheduler) -> Result<()> {
        loop {
            self.propagate_failures(graph);

            let ready: Vec<String> = self
                .tasks
                .iter()
                .filter(|(_, task)| {
                    matches!(task.state(), TaskState::Pending | TaskState::Retrying)
                        && task.dependencies().iter().all(|dependency| {
                            self.tasks
                                .get(dependency)
                                .is_some_and(|dep| dep.state() == TaskState::Success)
                        })
                })
                .map(|(name, _)| name.clone())
                .collect();

            if ready.is_empty() {
                let remaining: Vec<String> = self
                    .tasks
                    .values()
                    .filter(|task| !task.state().is_terminal())
                    .map(|task| task.name().to_string())
                    .collect();

                if remaining.is_empty() {
                    return Ok(());
                }
                // Unreachable once validation passed, kept as a hard stop.
                error!(?remaining, "scheduling deadlock");
                return Err(WorkflowError::Deadlock { remaining });
            }

            debug!(wave = ?ready, "executing wave");

            let mut attempts = Vec::with_capacity(ready.len());
            for name in &ready {
                let context = self.context_for(name);
                let Some(task) = self.tasks.get_mut(name) else {
                    continue;
                };
                task.begin_attempt();
                let retry_delay = (task.attempts() >= 2)
                    .then(|| task.retry_policy().delay_for(task.attempts() - 2));
                attempts.push(PreparedAttempt {
                    task_name: name.clone(),
                    func: task.func(),
                    context,
                    timeout: task.timeout(),
                    retry_delay,
                });
            }

            for result in scheduler.execute_wave(attempts).await {
                let Some(task) = self.tasks.get_mut(&result.task_name) else {
                    continue;
                };
                match task.complete_attempt(result.started, result.ended, result.outcome) {
                    Outcome::Success(_) => {
                        info!(task = %result.task_name, "task succeeded");
                    }
                    Outcome::Retryable(message) => {
                        warn!(
                            task = %result.task_name,
                            attempt = task.attempts(),
                            %message,
                            "task attempt failed, will retry"
                        );
                    }
                    Outcome::Terminal(message) => {
                        error!(task = %result.task_name, %message, "task failed terminally");
                    }
                }
            }
        }
    }

    /// Mark every non-terminal task downstream of a failure as failed,
    /// transitively, without invoking its function.
    fn propagate_failures(&mut self, graph: &DependencyGraph) {
        let mut queue: Vec<String> = self
            .tasks
            .values()
            .filter(|task| task.state() == TaskState::Failure)
            .map(|task| task.name().to_string())
            .collect();
        let mut visited: HashSet<String> = queue.iter().cloned().collect();

        while let Some(failed) = queue.pop() {
            for dependent in graph.dependents(&failed) {
                if !visited.insert(dependent.clone()) {
                    continue;
                }
                let Some(task) = self.tasks.get_mut(&dependent) else {
                    continue;
                };
                match task.state() {
                    TaskState::Pending | TaskState::Retrying => {
                        warn!(task = %dependent, dependency = %failed, "failing task: dependency failed");
                        task.mark_dependency_failed(&failed);
                        queue.push(dependent);
                    }
                    TaskState::Failure => queue.push(dependent),
                    _ => {}
                }
            }
        }
    }

    /// Union of the mapping-typed results of a task's dependencies. Later
    /// dependencies win on key conflicts; non-mapping results are not merged.
    fn context_for(&self, name: &str) -> Context {
        let mut context = Context::new();
        if let Some(task) = self.tasks.get(name) {
            for dependency in task.dependencies() {
                if let Some(Value::Object(map)) = self
                    .tasks
                    .get(dependency)
                    .and_then(|dep| dep.result())
                {
                    for (key, value) in map {
                        context.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        context
    }
}
