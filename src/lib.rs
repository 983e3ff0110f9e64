// ABOUTME: Main library module for the trellis task orchestration engine
// ABOUTME: Exports the workflow, task, schedule, and history types

mod dependency;
mod scheduler;

pub mod error;
pub mod history;
pub mod schedule;
pub mod task;
pub mod workflow;

// Re-export commonly used types
pub use error::{Result, WorkflowError};
pub use history::{
    AttemptStatus, ExecutionRecord, TaskExecutionInfo, WorkflowExecution, WorkflowStatus,
};
pub use schedule::{Schedule, ScheduleType};
pub use task::{Context, Outcome, RetryPolicy, Task, TaskFn, TaskState};
pub use workflow::{RunMode, Workflow};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
