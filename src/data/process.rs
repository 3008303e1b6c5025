use std::{
    cmp::{max, min},
    ffi::{OsStr, OsString},
    process::{ExitStatus, Output, Stdio},
    time::Duration,
};

use lazy_static::lazy_static;
use tokio::{process::Command, sync::Semaphore};

use crate::CONCURRENT_MEDIA_PROCESS_LIMIT;

lazy_static! {
    pub static ref MEDIA_PROCESS_SEMAPHORE: Semaphore = {
        let limit = match *CONCURRENT_MEDIA_PROCESS_LIMIT {
            Some(limit) => limit,
            None => {
                let num_cpus = num_cpus::get();
                max(1, min(8, num_cpus / 2))
            }
        };
        log::info!("CONCURRENT_MEDIA_PROCESS_LIMIT set to {limit}");
        Semaphore::new(limit)
    };
}

/// An external program plus the arguments that precede every invocation, e.g. `ffprobe` or
/// `sh fake_ffprobe.sh`.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: OsString,
    leading_args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.leading_args.push(arg.into());
        self
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to get process output: {0}")]
    Wait(#[source] std::io::Error),
    #[error("process timed out after {0:?}")]
    TimedOut(Duration),
    #[error("process failed with status {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
    #[error("process permit could not be acquired")]
    Cancelled,
}

/// Runs the tool with the given arguments and returns its captured output if it exits
/// successfully.
///
/// Both stdout and stderr are piped and drained while waiting for the process so a chatty
/// process can never block on a full pipe. The process is killed if `timeout` elapses or the
/// returned future is dropped.
pub async fn run_tool<I, S>(
    tool: &ToolCommand,
    args: I,
    timeout: Duration,
) -> Result<Output, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let _permit = MEDIA_PROCESS_SEMAPHORE
        .acquire()
        .await
        .map_err(|_| ToolError::Cancelled)?;

    let mut command = Command::new(&tool.program);
    command
        .args(&tool.leading_args)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    log::debug!("Spawning process {:?}", command.as_std());
    let child = command.spawn().map_err(ToolError::Spawn)?;

    // dropping the wait_with_output future on timeout drops the child, which kills it
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output.map_err(ToolError::Wait)?,
        Err(_) => return Err(ToolError::TimedOut(timeout)),
    };

    if !output.status.success() {
        return Err(ToolError::Exit {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    if !output.stderr.is_empty() {
        log::warn!(
            "{} reported errors but finished successfully, proceeding: {}",
            tool.program.to_string_lossy(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(output)
}
