use async_trait::async_trait;
use std::io;

use crate::domain::media::MediaCommand;

/// Exit status and captured pipes of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// A running external process.
#[async_trait]
pub trait ChildProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Wait for exit. Must be cancel safe: the future may be dropped so the
    /// process can be killed instead.
    async fn wait(&mut self) -> io::Result<ProcessOutput>;

    /// Send the kill signal without waiting. Errors if the process is already gone.
    fn start_kill(&mut self) -> io::Result<()>;
}

pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, command: &MediaCommand) -> io::Result<Box<dyn ChildProcess>>;
}
