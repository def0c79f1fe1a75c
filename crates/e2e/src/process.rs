//! Child process supervision for Node scripts
//!
//! Runs a command with piped output under a deadline. On expiry the whole
//! process group gets SIGTERM, then SIGKILL after a short grace period, so
//! browsers launched by the script go down with it.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{ExecError, ExecResult};

const TERMINATE_GRACE: Duration = Duration::from_secs(2);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What a finished (or killed) process left behind
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// None when killed by a signal or on timeout
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!("Output stream closed with error: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(id) = child.id() {
            let pgid = Pid::from_raw(id as i32);
            if killpg(pgid, Signal::SIGTERM).is_ok()
                && tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok()
            {
                return;
            }
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill timed-out process: {}", e);
    }
}

/// Spawn `command` and wait at most `timeout` for it to exit
pub async fn run_with_timeout(
    mut command: Command,
    binary: &Path,
    timeout: Duration,
) -> ExecResult<ProcessOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExecError::NodeNotFound(binary.to_path_buf())
        } else {
            ExecError::Spawn {
                binary: binary.to_path_buf(),
                source: e,
            }
        }
    })?;

    let stdout_task = tokio::spawn(read_all(child.stdout.take()));
    let stderr_task = tokio::spawn(read_all(child.stderr.take()));

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (status?.code(), false),
        Err(_) => {
            debug!("Process exceeded {:?}, terminating", timeout);
            terminate(&mut child).await;
            (None, true)
        }
    };
    let duration = start.elapsed();

    let stdout = match tokio::time::timeout(DRAIN_TIMEOUT, stdout_task).await {
        Ok(Ok(text)) => text,
        _ => String::new(),
    };
    let stderr = match tokio::time::timeout(DRAIN_TIMEOUT, stderr_task).await {
        Ok(Ok(text)) => text,
        _ => String::new(),
    };

    Ok(ProcessOutput {
        exit_code,
        stdout,
        stderr,
        timed_out,
        duration,
    })
}
