//! Error types shared across layers.
//!
//! Per-unit errors (`UnitError`) never leave the executor: they are folded into
//! an `Outcome`. Only `OrchestratorError` reaches callers of the orchestrator.

use std::io;

use crate::domain::task::{TaskId, TaskState};

/// Control-flow signal raised by a cancellation checkpoint. Never shown to users.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {0} was canceled")]
pub struct TaskCanceled(pub TaskId);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {task_id}: invalid transition {from} -> {to}")]
pub struct StateTransitionError {
    pub task_id: String,
    pub from: TaskState,
    pub to: TaskState,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is not a valid value: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("{0}")]
    OutOfRange(String),
}

/// Failure reported by the ad platform. `message` holds the raw payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("image conversion failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("conversion worker died: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Killed through the process registry.
    #[error("{program} was terminated")]
    Terminated { program: String },

    #[error(transparent)]
    Canceled(#[from] TaskCanceled),

    #[error("process I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error(transparent)]
    Canceled(#[from] TaskCanceled),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("{step} failed: {source}")]
    Remote {
        step: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("video {asset_id} did not become ready in time")]
    NotReady { asset_id: String },

    #[error("could not read duration of {0}")]
    UnknownDuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl UnitError {
    pub fn remote(step: &'static str, source: RemoteError) -> Self {
        Self::Remote { step, source }
    }

    /// Whether this error only exists because the task was canceled.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Canceled(_)
                | Self::Process(ProcessError::Terminated { .. })
                | Self::Process(ProcessError::Canceled(_))
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("task {0} is already running")]
    DuplicateTask(TaskId),

    #[error("invalid batch request: {0}")]
    InvalidRequest(String),

    #[error("campaign {0} not found")]
    CampaignNotFound(String),

    /// The platform failed while creating or looking up the campaign.
    #[error("campaign setup failed: {0}")]
    Campaign(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transition(#[from] StateTransitionError),

    #[error("orchestration failed: {0}")]
    Orchestration(String),
}
