use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StateTransitionError;

/// Caller-supplied identifier of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id, used when the caller does not supply one.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted, background run not started yet
    Pending,
    /// Groups are being dispatched
    Running,
    /// Cancellation requested, in-flight units are draining
    Canceling,
    Canceled,
    Completed,
    Failed,
}

impl TaskState {
    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Running) => true,
            (Pending | Running, Canceling) => true,
            (Running | Canceling, Canceled) => true,
            (Pending, Canceled) => true,
            (Running, Completed) => true,
            (Pending | Running | Canceling, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Canceling => write!(f, "canceling"),
            Self::Canceled => write!(f, "canceled"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// In-flight bookkeeping for one batch, owned by the orchestrator's task table.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub state: TaskState,
    pub total_units: usize,
}

impl TaskRecord {
    pub fn new(id: TaskId, total_units: usize) -> Self {
        Self {
            id,
            state: TaskState::Pending,
            total_units,
        }
    }

    pub fn transition(&mut self, next: TaskState) -> Result<(), StateTransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(StateTransitionError {
                task_id: self.id.to_string(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Point-in-time view of a batch, served to callers polling for status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub state: TaskState,
    pub processed_units: usize,
    pub total_units: usize,
}
