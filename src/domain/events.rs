use serde::{Deserialize, Serialize};

use super::task::TaskId;

/// Something a batch wants its watchers to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub kind: TaskEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEventKind {
    /// `step` reads `"processed/total"`.
    Progress { percent: u8, step: String },
    Error { message: String },
    TaskComplete,
}

impl TaskEvent {
    pub fn progress(task_id: &TaskId, processed: usize, total: usize) -> Self {
        Self {
            task_id: task_id.clone(),
            kind: TaskEventKind::Progress {
                percent: percent_of(processed, total),
                step: format!("{}/{}", processed, total),
            },
        }
    }

    pub fn error(task_id: &TaskId, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.clone(),
            kind: TaskEventKind::Error {
                message: message.into(),
            },
        }
    }

    pub fn complete(task_id: &TaskId) -> Self {
        Self {
            task_id: task_id.clone(),
            kind: TaskEventKind::TaskComplete,
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self.kind {
            TaskEventKind::Progress { .. } => "progress",
            TaskEventKind::Error { .. } => "error",
            TaskEventKind::TaskComplete => "task_complete",
        }
    }
}

/// Integer percentage; an empty batch counts as done.
pub fn percent_of(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed.min(total) * 100) / total) as u8
}
