//! # Command Execution Abstraction Layer
//!
//! Every interaction with the container engine goes through a single narrow
//! interface: arguments in, captured output (or live output streams) out.
//! The orchestrator and the introspection code only ever see [`CommandRunner`],
//! which keeps them testable without a real engine installed.
//!
//! ## Core Components
//!
//! - **[`CommandRunner`]**: async trait implemented by every executor
//! - **[`HostExecutor`]**: spawns real processes via `tokio::process::Command`
//! - **[`ScriptedExecutor`]**: replays canned responses and records invocations
//! - **[`ExecutionCommand`]**: program, arguments, timeout and cancellation token
//! - **[`ExecutionResult`]**: stdout, stderr, exit code and duration
//! - **[`StreamingChild`]**: two live output streams plus an exit future
//!
//! ## Execution Flow
//!
//! ```text
//! ExecutionCommand
//!        ↓
//!   ┌────┴──────────────┐
//!   │                   │
//! execute()      spawn_streaming()
//!   │                   │
//!   ↓                   ↓
//! ExecutionResult   StreamingChild
//! (bounded)         (until exit or cancel)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sts::executor::{CommandRunner, ExecutionCommand, HostExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = HostExecutor::new();
//!     let command = ExecutionCommand::new("docker", vec!["ps".to_string()])
//!         .with_timeout(Duration::from_secs(5));
//!
//!     let result = executor.execute(command).await?;
//!     println!("{}", result.combined());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

/// Host-based command execution.
///
/// Implements [`HostExecutor`] for direct process execution on the
/// host system using `tokio::process::Command`.
pub mod host;

/// Replayable executor used by tests and dry runs.
pub mod scripted;

pub use host::HostExecutor;
pub use scripted::{ScriptedExecutor, ScriptedResponse};

/// Result of command execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Exit code (0 = success, non-zero = failure)
    pub exit_code: i32,
    /// Duration of command execution
    pub duration: Duration,
}

impl ExecutionResult {
    /// Check if the command executed successfully (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr), trimmed.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr).trim().to_string()
    }
}

/// Command to execute
#[derive(Debug, Clone)]
pub struct ExecutionCommand {
    /// Program name or path to execute
    pub program: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Maximum execution time (None = no timeout)
    pub timeout: Option<Duration>,
    /// Cancels the invocation and kills the process when fired
    pub cancel: Option<CancellationToken>,
}

impl ExecutionCommand {
    /// Create a new command with just program and args
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: HashMap::new(),
            timeout: None,
            cancel: None,
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl fmt::Display for ExecutionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Errors during command execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The program could not be started
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Command execution timed out
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired
    #[error("Execution cancelled")]
    Cancelled,

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Byte stream produced by a running process.
pub type OutputStream = Pin<Box<dyn AsyncRead + Send>>;

/// A process whose output is consumed while it runs.
///
/// Dropping `exit` before it resolves kills the process.
pub struct StreamingChild {
    /// Primary output (stdout)
    pub stdout: OutputStream,
    /// Diagnostic output (stderr)
    pub stderr: OutputStream,
    /// Resolves to the exit code once the process ends
    pub exit: BoxFuture<'static, Result<i32, ExecutorError>>,
}

/// Runs external programs on behalf of the engine adapter.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned, exceeds its
    /// timeout, or is cancelled. A non-zero exit is *not* an error here.
    async fn execute(&self, command: ExecutionCommand) -> Result<ExecutionResult, ExecutorError>;

    /// Start a long-running command and hand back its live output streams.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    async fn spawn_streaming(&self, command: ExecutionCommand)
    -> Result<StreamingChild, ExecutorError>;

    /// Executor type name for logging
    fn executor_type(&self) -> &'static str;
}
