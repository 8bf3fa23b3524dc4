use serde::{Deserialize, Serialize};

/// The five states a `TaskRun` passes through. A run never leaves
/// `Done`/`Error`; `Running` implies `started_at` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Created,
    Running,
    Stopping,
    Done,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }
}

/// A snapshot of one task for `TaskRunner::stats()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    pub status: TaskStatus,
    pub started_at_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskRunnerStats {
    pub total: usize,
    pub running: usize,
    pub tasks: Vec<TaskSummary>,
}
