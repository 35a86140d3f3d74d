//! Subprocess execution with a hard timeout

use std::process::{ExitStatus, Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

/// How long pipes may stay open after the child exits before reading stops.
/// A daemon spawned by a restart command can hold stdout indefinitely.
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// Failure to obtain process output
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to execute: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Timed out after {0}s")]
    Timeout(u64),
}

/// Run a command until the child exits, killing its whole process group on
/// timeout.
///
/// Completion is the child's exit, not EOF on its pipes: output written after
/// the exit is collected for at most [`PIPE_GRACE`]. Descendants still running
/// when the child exits are left alone.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, ProcessError> {
    execute(cmd, timeout, false).await
}

/// Like [`run_with_timeout`], but also kills the process group once the
/// child exits, so nothing it backgrounded outlives the run.
pub async fn run_contained(cmd: &mut Command, timeout: Duration) -> Result<Output, ProcessError> {
    execute(cmd, timeout, true).await
}

async fn execute(
    cmd: &mut Command,
    timeout: Duration,
    reap_group: bool,
) -> Result<Output, ProcessError> {
    cmd.kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    // process_group(0) makes the child a group leader: pgid == pid
    let pgid = child.id();
    let stdout = PipeReader::spawn(child.stdout.take());
    let stderr = PipeReader::spawn(child.stderr.take());

    let status: ExitStatus = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            kill_group(pgid).await;
            return Err(ProcessError::Spawn(e));
        }
        Err(_) => {
            kill_group(pgid).await;
            let _ = child.kill().await;
            stdout.abort();
            stderr.abort();
            return Err(ProcessError::Timeout(timeout.as_secs()));
        }
    };

    if reap_group {
        kill_group(pgid).await;
    }

    Ok(Output {
        status,
        stdout: stdout.finish().await,
        stderr: stderr.finish().await,
    })
}

/// Background reader that keeps whatever arrived if it has to be cut off
struct PipeReader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl PipeReader {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let handle = pipe.map(|mut pipe| {
            let sink = Arc::clone(&buf);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => sink
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buf, handle }
    }

    async fn finish(mut self) -> Vec<u8> {
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(PIPE_GRACE, &mut handle).await.is_err() {
                debug!("Pipe still open after child exit; output cut off");
                handle.abort();
            }
        }
        std::mem::take(&mut *self.buf.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// SIGKILL every process in the group led by `pgid`
#[cfg(unix)]
async fn kill_group(pgid: Option<u32>) {
    let Some(pgid) = pgid else {
        return;
    };
    let killed = Command::new("sh")
        .arg("-c")
        .arg(format!("kill -9 -{pgid} 2>/dev/null"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = killed {
        debug!(pgid, error = %e, "Failed to signal process group");
    }
}

#[cfg(not(unix))]
async fn kill_group(_pgid: Option<u32>) {}

/// Lossy UTF-8 decode, cut to at most `max_bytes` on a char boundary
pub fn truncate_output(bytes: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_bytes {
        return text.into_owned();
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... [truncated {} bytes]", &text[..cut], text.len() - cut)
}
