//! Timeout-bounded external command execution.
//!
//! Shared by the CLI-backed orchestration and routing clients. A command
//! that outlives its deadline is killed; callers never wait indefinitely.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Errors from running an external command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The program could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that was invoked.
        program: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Writing stdin or collecting output failed.
    #[error("i/o error while running {program}: {source}")]
    Io {
        /// Program that was invoked.
        program: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The command did not exit before its deadline and was killed.
    #[error("{program} timed out after {}s", limit.as_secs())]
    TimedOut {
        /// Program that was invoked.
        program: String,
        /// Deadline that was exceeded.
        limit: Duration,
    },
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit code, if the process was not killed by a signal.
    pub code: Option<i32>,
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
}

impl CommandOutput {
    /// Short description of the exit, e.g. `exit code 1`.
    #[must_use]
    pub fn exit_description(&self) -> String {
        self.code
            .map_or_else(|| "terminated by signal".to_owned(), |c| format!("exit code {c}"))
    }

    /// Stdout and stderr joined, for diagnostics.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_owned(),
            (out, "") => out.to_owned(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Run `program` with `args`, optionally feeding `stdin`, within `limit`.
pub async fn run<I, S>(
    program: &str,
    args: I,
    stdin: Option<&[u8]>,
    limit: Duration,
) -> Result<CommandOutput, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
        program: program.to_owned(),
        source,
    })?;

    let io_error = |source| CommandError::Io {
        program: program.to_owned(),
        source,
    };

    let work = async {
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }
        child.wait_with_output().await
    };

    // Dropping the future on timeout drops the child, which kills it.
    let output = match timeout(limit, work).await {
        Ok(result) => result.map_err(io_error)?,
        Err(_) => {
            return Err(CommandError::TimedOut {
                program: program.to_owned(),
                limit,
            })
        }
    };

    let output = CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    debug!(
        program,
        success = output.success,
        stdout = %output.stdout.trim(),
        stderr = %output.stderr.trim(),
        "command finished"
    );

    Ok(output)
}
