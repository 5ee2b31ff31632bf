//! Child process execution bounded by a timeout and a cancellation token.
//!
//! On timeout or cancellation the child is killed and then awaited, so no
//! encoder or grabber is left running or unreaped.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} timed out after {elapsed:?}")]
    Timeout { program: String, elapsed: Duration },
    #[error("{program} cancelled")]
    Cancelled { program: String },
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn stderr_excerpt(&self, limit: usize) -> String {
        String::from_utf8_lossy(&self.stderr).trim().chars().take(limit).collect()
    }
}

pub async fn run(
    mut command: Command,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, ProcessError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdout = tokio::spawn(read_all(child.stdout.take()));
    let stderr = tokio::spawn(read_all(child.stderr.take()));

    let status = tokio::select! {
        status = child.wait() => status.map_err(|source| ProcessError::Wait {
            program: program.clone(),
            source,
        })?,
        _ = tokio::time::sleep(limit) => {
            terminate(&mut child, &program).await;
            return Err(ProcessError::Timeout { program, elapsed: started.elapsed() });
        }
        _ = cancel.cancelled() => {
            terminate(&mut child, &program).await;
            return Err(ProcessError::Cancelled { program });
        }
    };

    Ok(ProcessOutput {
        status,
        stdout: stdout.await.unwrap_or_default(),
        stderr: stderr.await.unwrap_or_default(),
        elapsed: started.elapsed(),
    })
}

async fn terminate(child: &mut Child, program: &str) {
    // kill() sends SIGKILL and reaps the child.
    if let Err(err) = child.kill().await {
        warn!(program, error = %err, "failed to kill child process");
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}
