//! Native host command execution.
//!
//! Executes commands directly on the host system using `tokio::process::Command`.
//! Every child is spawned with `kill_on_drop`, so abandoning a timed-out or
//! cancelled invocation also terminates the process.

use super::{CommandRunner, ExecutionCommand, ExecutionResult, ExecutorError, StreamingChild};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Executes commands directly on the host system
#[derive(Debug, Clone)]
pub struct HostExecutor;

impl HostExecutor {
    /// Create a new host executor
    pub fn new() -> Self {
        Self
    }

    fn build(cmd: &ExecutionCommand) -> Command {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        command
    }
}

impl Default for HostExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for HostExecutor {
    async fn execute(&self, cmd: ExecutionCommand) -> Result<ExecutionResult, ExecutorError> {
        debug!("Executing command on host: {} {:?}", cmd.program, cmd.args);

        let start = Instant::now();
        let child = Self::build(&cmd)
            .spawn()
            .map_err(|source| ExecutorError::SpawnFailed {
                program: cmd.program.clone(),
                source,
            })?;

        let cancel = cmd.cancel.clone().unwrap_or_default();
        let wait = child.wait_with_output();
        let bounded = async {
            match cmd.timeout {
                Some(limit) => match tokio::time::timeout(limit, wait).await {
                    Ok(result) => result.map_err(ExecutorError::from),
                    Err(_) => Err(ExecutorError::Timeout(limit)),
                },
                None => wait.await.map_err(ExecutorError::from),
            }
        };

        // Dropping `bounded` on cancellation drops the child, which kills it.
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
            result = bounded => result?,
        };

        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }

    async fn spawn_streaming(
        &self,
        cmd: ExecutionCommand,
    ) -> Result<StreamingChild, ExecutorError> {
        debug!("Streaming command on host: {} {:?}", cmd.program, cmd.args);

        let mut child = Self::build(&cmd)
            .spawn()
            .map_err(|source| ExecutorError::SpawnFailed {
                program: cmd.program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::Other("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutorError::Other("Failed to capture stderr".to_string()))?;

        let cancel = cmd.cancel.unwrap_or_default();
        let exit = Box::pin(async move {
            let status: Result<i32, ExecutorError> = tokio::select! {
                _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
                status = child.wait() => status
                    .map(|s| s.code().unwrap_or(-1))
                    .map_err(ExecutorError::from),
            };
            status
        });

        Ok(StreamingChild {
            stdout: Box::pin(stdout),
            stderr: Box::pin(stderr),
            exit,
        })
    }

    fn executor_type(&self) -> &'static str {
        "host"
    }
}
