//! Tracking and killing the external processes spawned on behalf of a task.
//!
//! A worker blocked on ffmpeg cannot observe a cancellation flag, so the
//! registry keeps one kill switch per running process and flips all of a
//! task's switches at once when the task is canceled.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

use super::cancellation::CancellationRegistry;
use crate::domain::media::MediaCommand;
use crate::domain::task::TaskId;
use crate::error::ProcessError;
use crate::ports::process::{ProcessLauncher, ProcessOutput};

/// Kill switch for one spawned process.
#[derive(Debug, Clone)]
pub struct ExternalProcessHandle {
    id: u64,
    pid: Option<u32>,
    task_id: TaskId,
    kill: CancellationToken,
}

impl ExternalProcessHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn terminate(&self) {
        debug!(task_id = %self.task_id, pid = ?self.pid, "terminating process");
        self.kill.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.kill.is_cancelled()
    }

    /// Resolves once `terminate` has been called.
    pub fn killed(&self) -> WaitForCancellationFuture<'_> {
        self.kill.cancelled()
    }
}

#[derive(Default)]
pub struct ProcessRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<TaskId, Vec<ExternalProcessHandle>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_id: &TaskId, handle: ExternalProcessHandle) {
        self.entries
            .lock()
            .entry(task_id.clone())
            .or_default()
            .push(handle);
    }

    /// Create a handle for a freshly spawned process and register it.
    pub fn register_new(&self, task_id: &TaskId, pid: Option<u32>) -> ExternalProcessHandle {
        let handle = ExternalProcessHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            pid,
            task_id: task_id.clone(),
            kill: CancellationToken::new(),
        };
        self.register(task_id, handle.clone());
        handle
    }

    /// Forget a handle whose process exited on its own.
    pub fn unregister(&self, task_id: &TaskId, handle_id: u64) {
        if let Some(handles) = self.entries.lock().get_mut(task_id) {
            handles.retain(|handle| handle.id != handle_id);
        }
    }

    /// Signal every process registered for `task_id`, then clear the list.
    pub fn terminate_all(&self, task_id: &TaskId) {
        let handles = match self.entries.lock().get_mut(task_id) {
            Some(handles) => std::mem::take(handles),
            None => return,
        };
        for handle in &handles {
            handle.terminate();
        }
        if !handles.is_empty() {
            info!(task_id = %task_id, count = handles.len(), "terminated external processes");
        }
    }

    /// Remove the task's entry entirely. Idempotent.
    pub fn release(&self, task_id: &TaskId) {
        self.entries.lock().remove(task_id);
    }

    pub fn outstanding(&self, task_id: &TaskId) -> usize {
        self.entries
            .lock()
            .get(task_id)
            .map(|handles| handles.len())
            .unwrap_or(0)
    }
}

/// Spawns a command, keeps it registered while it runs and honours kill requests.
pub struct ProcessRunner {
    launcher: Arc<dyn ProcessLauncher>,
    processes: Arc<ProcessRegistry>,
    cancellations: Arc<CancellationRegistry>,
}

impl ProcessRunner {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        processes: Arc<ProcessRegistry>,
        cancellations: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            launcher,
            processes,
            cancellations,
        }
    }

    /// Run `command` to completion for `task_id`. A non-zero exit is an error;
    /// a kill through the registry surfaces as `ProcessError::Terminated`.
    pub async fn run(
        &self,
        task_id: &TaskId,
        command: &MediaCommand,
    ) -> Result<ProcessOutput, ProcessError> {
        self.cancellations.check(task_id)?;

        let program = command.program_name();
        let mut child = self
            .launcher
            .spawn(command)
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;
        let handle = self.processes.register_new(task_id, child.id());

        // A cancel landing between the checkpoint and the registration
        // missed this handle.
        if self.cancellations.is_canceled(task_id) {
            handle.terminate();
        }

        debug!(task_id = %task_id, pid = ?handle.pid(), command = %command, "process started");

        let waited = tokio::select! {
            biased;
            _ = handle.killed() => None,
            output = child.wait() => Some(output),
        };
        self.processes.unregister(task_id, handle.id());

        let Some(output) = waited else {
            if let Err(e) = child.start_kill() {
                debug!(task_id = %task_id, error = %e, "kill failed, process already gone");
            }
            // reap
            let _ = child.wait().await;
            info!(task_id = %task_id, program = %program, "process terminated");
            return Err(ProcessError::Terminated { program });
        };

        let output = output?;
        if !output.success {
            return Err(ProcessError::Failed {
                program,
                code: output.code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}
