//! Replayable command execution.
//!
//! [`ScriptedExecutor`] answers each invocation with the next queued
//! [`ScriptedResponse`] and remembers the arguments it was called with, so the
//! engine adapter can be exercised without a container engine.

use super::{CommandRunner, ExecutionCommand, ExecutionResult, ExecutorError, StreamingChild};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// How a scripted invocation ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// Exit with the response's exit code
    #[default]
    Exit,
    /// Report a timeout without producing output
    Timeout,
    /// Produce the output, then stay alive until cancelled or timed out
    Hang,
}

/// Canned answer for one invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub outcome: ScriptedOutcome,
}

impl ScriptedResponse {
    /// Successful exit with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Failed exit with the given code and stderr.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Default::default()
        }
    }

    /// Invocation that runs past its deadline.
    pub fn timeout() -> Self {
        Self {
            outcome: ScriptedOutcome::Timeout,
            ..Default::default()
        }
    }

    /// Long-running invocation that emits output and never exits on its own.
    pub fn hanging(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            outcome: ScriptedOutcome::Hang,
            ..Default::default()
        }
    }

    /// Set stderr on an existing response.
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

/// Executor that replays queued responses in FIFO order.
///
/// When the queue is empty every call succeeds with empty output.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    invocations: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an executor preloaded with responses.
    pub fn with_responses(responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        let executor = Self::new();
        for response in responses {
            executor.push(response);
        }
        executor
    }

    /// Queue another response.
    pub fn push(&self, response: ScriptedResponse) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    /// Arguments of every invocation so far, in call order.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next(&self, cmd: &ExecutionCommand) -> ScriptedResponse {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cmd.args.clone());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for ScriptedExecutor {
    async fn execute(&self, cmd: ExecutionCommand) -> Result<ExecutionResult, ExecutorError> {
        let response = self.next(&cmd);
        match response.outcome {
            ScriptedOutcome::Exit => Ok(ExecutionResult {
                stdout: response.stdout,
                stderr: response.stderr,
                exit_code: response.exit_code,
                duration: Duration::ZERO,
            }),
            ScriptedOutcome::Timeout => Err(ExecutorError::Timeout(
                cmd.timeout.unwrap_or(Duration::ZERO),
            )),
            ScriptedOutcome::Hang => {
                let cancel = cmd.cancel.unwrap_or_default();
                match cmd.timeout {
                    Some(limit) => tokio::select! {
                        _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
                        _ = tokio::time::sleep(limit) => Err(ExecutorError::Timeout(limit)),
                    },
                    None => {
                        cancel.cancelled().await;
                        Err(ExecutorError::Cancelled)
                    }
                }
            }
        }
    }

    async fn spawn_streaming(
        &self,
        cmd: ExecutionCommand,
    ) -> Result<StreamingChild, ExecutorError> {
        let response = self.next(&cmd);
        match response.outcome {
            ScriptedOutcome::Exit => {
                let code = response.exit_code;
                Ok(StreamingChild {
                    stdout: Box::pin(Cursor::new(response.stdout.into_bytes())),
                    stderr: Box::pin(Cursor::new(response.stderr.into_bytes())),
                    exit: Box::pin(async move { Ok::<i32, ExecutorError>(code) }),
                })
            }
            ScriptedOutcome::Timeout => Err(ExecutorError::Timeout(
                cmd.timeout.unwrap_or(Duration::ZERO),
            )),
            ScriptedOutcome::Hang => {
                let (mut out_writer, out_reader) =
                    tokio::io::duplex(response.stdout.len() + 1024);
                let (mut err_writer, err_reader) =
                    tokio::io::duplex(response.stderr.len() + 1024);
                out_writer.write_all(response.stdout.as_bytes()).await?;
                err_writer.write_all(response.stderr.as_bytes()).await?;

                let cancel = cmd.cancel.unwrap_or_default();
                // Writers live inside the exit future; dropping it closes both streams.
                let exit = Box::pin(async move {
                    let _writers = (out_writer, err_writer);
                    cancel.cancelled().await;
                    Err::<i32, ExecutorError>(ExecutorError::Cancelled)
                });

                Ok(StreamingChild {
                    stdout: Box::pin(out_reader),
                    stderr: Box::pin(err_reader),
                    exit,
                })
            }
        }
    }

    fn executor_type(&self) -> &'static str {
        "scripted"
    }
}
