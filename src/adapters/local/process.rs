use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::domain::media::MediaCommand;
use crate::ports::process::{ChildProcess, ProcessLauncher, ProcessOutput};

/// Launches real subprocesses with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl TokioLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for TokioLauncher {
    fn spawn(&self, command: &MediaCommand) -> io::Result<Box<dyn ChildProcess>> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Pipes are drained in the background so a chatty ffmpeg never
        // blocks on a full pipe while we wait for its exit.
        let stdout = child.stdout.take().map(|pipe| tokio::spawn(drain(pipe)));
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(drain(pipe)));

        Ok(Box::new(TokioChild {
            child,
            stdout,
            stderr,
        }))
    }
}

struct TokioChild {
    child: Child,
    stdout: Option<JoinHandle<io::Result<Vec<u8>>>>,
    stderr: Option<JoinHandle<io::Result<Vec<u8>>>>,
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<ProcessOutput> {
        let status = self.child.wait().await?;
        let stdout = collect(&mut self.stdout).await?;
        let stderr = collect(&mut self.stderr).await?;

        Ok(ProcessOutput {
            success: status.success(),
            code: status.code(),
            stdout,
            stderr,
        })
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

async fn drain<R>(mut pipe: R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Output of a pipe reader. Polled by reference so a dropped `wait` keeps it.
async fn collect(reader: &mut Option<JoinHandle<io::Result<Vec<u8>>>>) -> io::Result<Vec<u8>> {
    let Some(handle) = reader.as_mut() else {
        return Ok(Vec::new());
    };
    let joined = handle.await;
    *reader = None;
    joined.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
