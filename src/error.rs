// ABOUTME: Error types for workflow validation and execution
// ABOUTME: Distinguishes graph validation faults from runtime task failures

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Duplicate task: '{name}' already exists in workflow")]
    DuplicateTask { name: String },

    #[error("Missing dependency: task '{task}' depends on '{dependency}', which does not exist")]
    MissingDependency { task: String, dependency: String },

    #[error("Cycle detected in workflow involving: {tasks:?}")]
    CycleDetected { tasks: Vec<String> },

    #[error("Task '{task}' failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("Scheduling deadlock: no runnable tasks while {remaining:?} are not terminal")]
    Deadlock { remaining: Vec<String> },
}

impl WorkflowError {
    /// True for faults raised before any task function executes. Callers use
    /// this to tell a broken graph apart from a failed run.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTask { .. } | Self::MissingDependency { .. } | Self::CycleDetected { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
