//! Subprocess supervision
//!
//! Spawns the interpreter, captures a bounded prefix of stdout/stderr while
//! draining the rest, and enforces the timeout. On timeout or cancellation the
//! whole process tree is terminated, not just the interpreter.

use std::process::Stdio;
use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{TERMINATED_EXIT_CODE, TIMEOUT_EXIT_CODE};

/// How long stream readers may lag behind process exit
const STREAM_GRACE: Duration = Duration::from_secs(2);

/// Captured prefix of one output stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStream {
    pub captured: Vec<u8>,
    /// Total bytes the process wrote, including the discarded tail
    pub total_bytes: u64,
    pub truncated: bool,
}

impl CapturedStream {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.captured).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    /// Killed by a signal without an exit code
    Signaled,
    TimedOut,
    Cancelled,
}

impl Termination {
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Exited(code) => code,
            Termination::Signaled | Termination::Cancelled => TERMINATED_EXIT_CODE,
            Termination::TimedOut => TIMEOUT_EXIT_CODE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub termination: Termination,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

/// Run `command` to completion, timeout or cancellation
///
/// Spawn failures are returned as `Err`; everything after a successful spawn
/// is reported through [`Termination`].
pub async fn run(
    mut command: Command,
    timeout: Duration,
    max_output_bytes: usize,
    cancel: &CancellationToken,
) -> std::io::Result<ProcessOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let pid = child.id();

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_task = tokio::spawn(read_stream(stdout_handle, max_output_bytes));
    let stderr_task = tokio::spawn(read_stream(stderr_handle, max_output_bytes));

    let termination = tokio::select! {
        status = tokio::time::timeout(timeout, child.wait()) => match status {
            Ok(Ok(status)) => status.code().map_or(Termination::Signaled, Termination::Exited),
            Ok(Err(e)) => {
                warn!("waiting for script process failed: {e}");
                kill_tree(pid, &mut child).await;
                Termination::Signaled
            }
            Err(_) => {
                debug!(?pid, "script exceeded {timeout:?}, terminating process tree");
                kill_tree(pid, &mut child).await;
                Termination::TimedOut
            }
        },
        _ = cancel.cancelled() => {
            debug!(?pid, "script cancelled, terminating process tree");
            kill_tree(pid, &mut child).await;
            Termination::Cancelled
        }
    };

    let stdout = collect(stdout_task).await;
    let stderr = collect(stderr_task).await;

    Ok(ProcessOutput {
        termination,
        stdout,
        stderr,
    })
}

async fn collect(task: tokio::task::JoinHandle<CapturedStream>) -> CapturedStream {
    let abort = task.abort_handle();
    match tokio::time::timeout(STREAM_GRACE, task).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("output reader failed: {e}");
            CapturedStream::default()
        }
        Err(_) => {
            abort.abort();
            warn!("output reader did not finish after process exit");
            CapturedStream::default()
        }
    }
}

/// Read up to `limit` bytes, then drain and count the rest
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, limit: usize) -> CapturedStream {
    let Some(mut handle) = handle else {
        return CapturedStream::default();
    };

    let mut captured = Vec::new();
    if let Err(e) = (&mut handle)
        .take(limit as u64)
        .read_to_end(&mut captured)
        .await
    {
        debug!("reading script output failed: {e}");
    }

    let rest = tokio::io::copy(&mut handle, &mut tokio::io::sink())
        .await
        .unwrap_or(0);

    CapturedStream {
        total_bytes: captured.len() as u64 + rest,
        truncated: rest > 0,
        captured,
    }
}

/// Terminate the child and every process it spawned
async fn kill_tree(pid: Option<u32>, child: &mut tokio::process::Child) {
    let descendants = match pid {
        Some(pid) => tokio::task::spawn_blocking(move || descendants_of(pid))
            .await
            .unwrap_or_default(),
        None => Vec::new(),
    };

    if let Err(e) = child.kill().await {
        debug!("killing script process failed: {e}");
    }

    if descendants.is_empty() {
        return;
    }

    tokio::task::spawn_blocking(move || {
        let mut system = System::new();
        let pids: Vec<Pid> = descendants.iter().copied().map(Pid::from_u32).collect();
        system.refresh_processes(ProcessesToUpdate::Some(&pids), true);
        for pid in pids {
            if let Some(process) = system.process(pid) {
                process.kill();
            }
        }
    })
    .await
    .unwrap_or_else(|e| warn!("killing script descendants failed: {e}"));
}

fn descendants_of(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut found = Vec::new();
    let mut frontier = vec![Pid::from_u32(root)];
    while let Some(parent) = frontier.pop() {
        for (pid, process) in system.processes() {
            if process.parent() == Some(parent) && !found.contains(&pid.as_u32()) {
                found.push(pid.as_u32());
                frontier.push(*pid);
            }
        }
    }
    found
}
