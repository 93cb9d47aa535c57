//! Shell command execution.

use async_trait::async_trait;
use mule_buildpack_core::error::{BuildpackError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Outcome of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs command lines through a shell.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command_line` to completion and capture its output.
    async fn run(&self, command_line: &str) -> Result<CommandOutput>;
}

/// `sh -c` runner with a per-command timeout.
pub struct ShellRunner {
    timeout: Duration,
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command_line: &str) -> Result<CommandOutput> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildpackError::Other(format!("Failed to spawn sh: {}", e)))?;

        // Dropping the wait future on timeout kills the child.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                BuildpackError::Timeout(format!(
                    "command did not finish within {}s",
                    self.timeout.as_secs()
                ))
            })??;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            exit_code: output.status.code(),
            output: combined,
        })
    }
}

/// Replace the current process with `sh -c command_line`.
///
/// Only returns if the exec itself failed.
#[cfg(unix)]
pub fn exec_shell(command_line: &str) -> BuildpackError {
    use std::os::unix::process::CommandExt;

    let err = std::process::Command::new("sh")
        .arg("-c")
        .arg(command_line)
        .exec();
    BuildpackError::Other(format!("Failed to exec sh: {}", err))
}
