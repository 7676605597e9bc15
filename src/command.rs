//! Bounded execution of external tools.
//!
//! Children are spawned with `kill_on_drop`, so a tool that outlives its deadline is killed when
//! the timed-out future is dropped.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;

use crate::report::{Failure, FailureKind};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`{program}` is not installed or not on PATH")]
    ToolMissing { program: String },
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` did not finish within {}s", timeout.as_secs_f64())]
    Timeout { program: String, timeout: Duration },
    #[error("`{program}` exited with {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::ToolMissing { .. } => FailureKind::ToolMissing,
            Error::Timeout { .. } => FailureKind::Timeout,
            Error::Spawn { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
                FailureKind::PermissionDenied
            }
            Error::Spawn { .. } | Error::Wait { .. } | Error::NonZeroExit { .. } => {
                FailureKind::Other
            }
        };
        Failure::new(kind, err.to_string())
    }
}

/// Runs `program` with `args` and returns its standard output.
///
/// # Errors
///
/// * [`Error::ToolMissing`] if the program cannot be found.
/// * [`Error::Timeout`] if it does not exit within `timeout`. The child is killed.
/// * [`Error::NonZeroExit`] if it exits unsuccessfully.
pub async fn run(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let mut command = Command::new(program);
    command.args(args);
    output(command, program, timeout).await
}

/// Runs a prepared command under `timeout` and returns its standard output.
///
/// Standard streams and `kill_on_drop` are set here; anything else, such as a process group,
/// is up to the caller.
pub async fn output(mut command: Command, program: &str, timeout: Duration) -> Result<String> {
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => Error::ToolMissing {
                program: program.to_owned(),
            },
            _ => Error::Spawn {
                program: program.to_owned(),
                source,
            },
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output.map_err(|source| Error::Wait {
            program: program.to_owned(),
            source,
        })?,
        Err(_) => {
            log::warn!("Killing `{program}` after {timeout:?}");
            return Err(Error::Timeout {
                program: program.to_owned(),
                timeout,
            });
        }
    };

    if !output.status.success() {
        return Err(Error::NonZeroExit {
            program: program.to_owned(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs a snippet through `sh -c`.
pub async fn run_shell(script: &str, timeout: Duration) -> Result<String> {
    run("sh", &["-c", script], timeout).await
}
