use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use super::processes::ProcessRegistry;
use crate::domain::task::TaskId;
use crate::error::TaskCanceled;

/// Process-wide set of tasks whose cancellation was requested.
///
/// A mark is level-triggered: once set, every checkpoint of that task fails
/// until the orchestrator clears it during finalization.
pub struct CancellationRegistry {
    canceled: Mutex<HashSet<TaskId>>,
    processes: Arc<ProcessRegistry>,
}

impl CancellationRegistry {
    pub fn new(processes: Arc<ProcessRegistry>) -> Self {
        Self {
            canceled: Mutex::new(HashSet::new()),
            processes,
        }
    }

    /// Mark `task_id` canceled and kill its registered processes. Idempotent.
    pub fn mark_canceled(&self, task_id: &TaskId) {
        let newly_marked = self.canceled.lock().insert(task_id.clone());
        if newly_marked {
            info!(task_id = %task_id, "cancellation requested");
        }
        // Always signal: processes registered since an earlier mark must die too.
        self.processes.terminate_all(task_id);
    }

    /// Cancellation checkpoint.
    pub fn check(&self, task_id: &TaskId) -> Result<(), TaskCanceled> {
        if self.is_canceled(task_id) {
            return Err(TaskCanceled(task_id.clone()));
        }
        Ok(())
    }

    pub fn is_canceled(&self, task_id: &TaskId) -> bool {
        self.canceled.lock().contains(task_id)
    }

    /// Drop the mark. Only the orchestrator calls this, when the task is finalized.
    pub fn clear(&self, task_id: &TaskId) {
        self.canceled.lock().remove(task_id);
    }
}
