// ABOUTME: Immutable audit records for task attempts and workflow runs
// ABOUTME: Records survive task resets and accumulate across repeated runs

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failure,
    Retry,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStatus::Success => write!(f, "success"),
            AttemptStatus::Failure => write!(f, "failure"),
            AttemptStatus::Retry => write!(f, "retry"),
        }
    }
}

/// One attempt of a task: real start/end timestamps plus how it resolved.
/// Append-only once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AttemptStatus,
}

impl ExecutionRecord {
    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Snapshot of a task's most recent attempt within one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionInfo {
    pub task_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AttemptStatus,
}

impl TaskExecutionInfo {
    pub fn from_record(task_name: &str, record: &ExecutionRecord) -> Self {
        Self {
            task_name: task_name.to_string(),
            start_time: record.start_time,
            end_time: record.end_time,
            status: record.status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Success,
    Failure,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Success => write!(f, "success"),
            WorkflowStatus::Failure => write!(f, "failure"),
        }
    }
}

/// One `run()` of a workflow. Created when the run finishes and appended to
/// the workflow's execution history; never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_name: String,
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: WorkflowStatus,
    pub task_executions: HashMap<String, TaskExecutionInfo>,
}

impl WorkflowExecution {
    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
