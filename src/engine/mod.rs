//! Container engine access through its command-line interface.
//!
//! [`EngineCli`] is the only type in the crate that knows engine verbs and
//! flags. Everything above it (image provisioning, the runtime adapter,
//! introspection) works in terms of its methods, and everything below it is a
//! [`CommandRunner`].

use crate::env::timeouts;
use crate::error::{Result, ServerError};
use crate::executor::{CommandRunner, ExecutionCommand, ExecutionResult, StreamingChild};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod image;
pub mod runtime;

pub use image::{ImageAction, ImageProvisioner};
pub use runtime::{PortOverride, RuntimeAdapter, StartConfiguration, StartedContainer};

/// Everything `run -d` needs to start one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    /// `key=value` label attached for bulk cleanup
    pub label: String,
    /// Container port to host port
    pub ports: BTreeMap<u16, u16>,
    pub env: BTreeMap<String, String>,
}

impl RunSpec {
    fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--label".to_string(),
            self.label.clone(),
        ];
        for (container_port, host_port) in &self.ports {
            args.push("-p".to_string());
            args.push(format!("{}:{}", host_port, container_port));
        }
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.image.clone());
        args
    }
}

/// Options for a bounded log read.
#[derive(Debug, Clone, Default)]
pub struct LogsOptions {
    pub tail: usize,
    /// RFC 3339 instant passed to `--since`
    pub since: Option<String>,
    pub timestamps: bool,
}

/// Thin wrapper over the engine CLI.
#[derive(Clone)]
pub struct EngineCli {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl EngineCli {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// Engine program name, e.g. `docker`.
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    fn command(&self, args: Vec<String>) -> ExecutionCommand {
        ExecutionCommand::new(self.program.clone(), args)
    }

    async fn run(&self, command: ExecutionCommand) -> Result<ExecutionResult> {
        info!("Running engine command: {}", command);
        let result = self.runner.execute(command).await?;
        debug!(
            "Engine command finished with exit code {} in {:?}",
            result.exit_code, result.duration
        );
        Ok(result)
    }

    /// Run a command and turn a non-zero exit into [`ServerError::ExternalProcess`].
    async fn run_checked(&self, command: ExecutionCommand) -> Result<ExecutionResult> {
        let rendered = command.to_string();
        let result = self.run(command).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(ServerError::ExternalProcess {
                command: rendered,
                output: result.combined(),
            })
        }
    }

    /// Whether the image is present in the local cache.
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        let command = self
            .command(vec!["image".into(), "inspect".into(), image.into()])
            .with_timeout(timeouts::IMAGE_INSPECT);
        let result = self.run(command).await?;
        Ok(result.success() && !result.combined().contains("No such image"))
    }

    /// Build `image` from the Dockerfile inside `context`.
    pub async fn build_image(&self, image: &str, context: &Path) -> Result<()> {
        let dockerfile = context.join("Dockerfile");
        let command = self
            .command(vec![
                "build".into(),
                "-t".into(),
                image.into(),
                "-f".into(),
                dockerfile.to_string_lossy().into_owned(),
                context.to_string_lossy().into_owned(),
            ])
            .with_timeout(timeouts::IMAGE_BUILD);

        let result = self.run(command).await?;
        if !result.success() {
            return Err(ServerError::BuildFailed {
                image: image.to_string(),
                output: result.combined(),
            });
        }
        info!("Image {} built successfully", image);
        Ok(())
    }

    pub async fn pull_image(&self, image: &str) -> Result<()> {
        let command = self
            .command(vec!["pull".into(), image.into()])
            .with_timeout(timeouts::IMAGE_PULL);

        let result = self.run(command).await?;
        if !result.success() {
            return Err(ServerError::PullFailed {
                image: image.to_string(),
                output: result.combined(),
            });
        }
        info!("Pulled image {}", image);
        Ok(())
    }

    /// Start a detached container and return the engine-assigned id.
    pub async fn run_detached(&self, spec: &RunSpec) -> Result<String> {
        let command = self
            .command(spec.to_args())
            .with_timeout(timeouts::CONTAINER_RUN);

        let result = self.run(command).await?;
        if !result.success() {
            return Err(ServerError::StartFailed {
                name: spec.name.clone(),
                output: result.combined(),
            });
        }
        Ok(result.stdout.trim().to_string())
    }

    /// Forcefully remove one or more containers in a single call.
    pub async fn remove(&self, ids: &[String]) -> Result<()> {
        let mut args = vec!["rm".to_string(), "-f".to_string()];
        args.extend(ids.iter().cloned());

        let result = self.run(self.command(args)).await?;
        if !result.success() {
            return Err(ServerError::StopFailed {
                id: ids.join(" "),
                output: result.combined(),
            });
        }
        Ok(())
    }

    /// Ids of every container, running or not, carrying `label`.
    pub async fn list_managed(&self, label: &str) -> Result<Vec<String>> {
        let command = self.command(vec![
            "ps".into(),
            "-aq".into(),
            "-f".into(),
            format!("label={}", label),
        ]);
        let result = self.run_checked(command).await?;
        Ok(result
            .stdout
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    /// Confirm a container exists.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the engine does not know the container.
    pub async fn inspect(&self, container: &str) -> Result<()> {
        let command = self
            .command(vec!["inspect".into(), container.into()])
            .with_timeout(timeouts::CONTAINER_INSPECT);
        let result = self.run(command).await?;
        if result.success() {
            Ok(())
        } else {
            debug!("inspect {} failed: {}", container, result.combined());
            Err(ServerError::NotFound(format!("container {}", container)))
        }
    }

    /// Run a command inside a container. A non-zero exit is returned, not raised.
    pub async fn exec(
        &self,
        container: &str,
        argv: &[String],
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<ExecutionResult> {
        let mut args = vec!["exec".to_string(), container.to_string()];
        args.extend(argv.iter().cloned());

        let mut command = self.command(args).with_timeout(timeout);
        if let Some(token) = cancel {
            command = command.with_cancellation(token);
        }
        self.run(command).await
    }

    /// Follow a command running inside a container.
    pub async fn exec_streaming(
        &self,
        container: &str,
        argv: &[String],
        cancel: CancellationToken,
    ) -> Result<StreamingChild> {
        let mut args = vec!["exec".to_string(), container.to_string()];
        args.extend(argv.iter().cloned());

        let command = self.command(args).with_cancellation(cancel);
        info!("Following engine command: {}", command);
        Ok(self.runner.spawn_streaming(command).await?)
    }

    /// Copy a host file to `dest` inside the container.
    pub async fn copy_into(&self, source: &Path, container: &str, dest: &str) -> Result<()> {
        let command = self
            .command(vec![
                "cp".into(),
                source.to_string_lossy().into_owned(),
                format!("{}:{}", container, dest),
            ])
            .with_timeout(timeouts::CONTAINER_COPY);
        self.run_checked(command).await?;
        Ok(())
    }

    /// Bounded log read. A non-zero exit is returned, not raised.
    pub async fn logs(&self, container: &str, options: &LogsOptions) -> Result<ExecutionResult> {
        let mut args = vec!["logs".to_string()];
        if options.timestamps {
            args.push("--timestamps".to_string());
        }
        args.push("--tail".to_string());
        args.push(options.tail.to_string());
        if let Some(since) = &options.since {
            args.push("--since".to_string());
            args.push(since.clone());
        }
        args.push(container.to_string());

        self.run(self.command(args).with_timeout(timeouts::LOG_FETCH))
            .await
    }

    /// Start following a container's log output.
    pub async fn follow_logs(
        &self,
        container: &str,
        tail: usize,
        cancel: CancellationToken,
    ) -> Result<StreamingChild> {
        let command = self
            .command(vec![
                "logs".into(),
                "-f".into(),
                "--tail".into(),
                tail.to_string(),
                container.into(),
            ])
            .with_cancellation(cancel);
        info!("Following engine command: {}", command);
        Ok(self.runner.spawn_streaming(command).await?)
    }
}

impl std::fmt::Debug for EngineCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCli")
            .field("program", &self.program)
            .field("runner", &self.runner.executor_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::executor::{ScriptedExecutor, ScriptedResponse};

    fn engine(responses: Vec<ScriptedResponse>) -> (Arc<ScriptedExecutor>, EngineCli) {
        let runner = Arc::new(ScriptedExecutor::with_responses(responses));
        let engine = EngineCli::new(runner.clone(), "docker");
        (runner, engine)
    }

    #[test]
    fn run_spec_renders_ports_and_env() {
        let spec = RunSpec {
            name: "simple-test-server-web-0".to_string(),
            image: "nginx:latest".to_string(),
            label: "managed_by=simple-test-server".to_string(),
            ports: BTreeMap::from([(80, 8080)]),
            env: BTreeMap::from([("A".to_string(), "1".to_string())]),
        };
        assert_eq!(
            spec.to_args(),
            vec![
                "run",
                "-d",
                "--name",
                "simple-test-server-web-0",
                "--label",
                "managed_by=simple-test-server",
                "-p",
                "8080:80",
                "-e",
                "A=1",
                "nginx:latest"
            ]
        );
    }

    #[tokio::test]
    async fn run_detached_returns_trimmed_id() {
        let (runner, engine) = engine(vec![ScriptedResponse::ok("abc123\n")]);
        let spec = RunSpec {
            name: "n".to_string(),
            image: "i".to_string(),
            label: "l=v".to_string(),
            ports: BTreeMap::new(),
            env: BTreeMap::new(),
        };
        assert_eq!(engine.run_detached(&spec).await.unwrap(), "abc123");
        assert_eq!(runner.invocations()[0][0], "run");
    }

    #[tokio::test]
    async fn failed_pull_keeps_output() {
        let (_, engine) = engine(vec![ScriptedResponse::failure(1, "manifest unknown")]);
        let err = engine.pull_image("nope:latest").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalProcessFailure);
        assert!(err.to_string().contains("manifest unknown"));
    }

    #[tokio::test]
    async fn missing_container_is_not_found() {
        let (_, engine) = engine(vec![ScriptedResponse::failure(
            1,
            "Error: No such object: ghost",
        )]);
        let err = engine.inspect("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_managed_splits_ids() {
        let (runner, engine) = engine(vec![ScriptedResponse::ok("aaa\nbbb\n")]);
        let ids = engine
            .list_managed("managed_by=simple-test-server")
            .await
            .unwrap();
        assert_eq!(ids, vec!["aaa", "bbb"]);
        assert_eq!(
            runner.invocations()[0],
            vec!["ps", "-aq", "-f", "label=managed_by=simple-test-server"]
        );
    }

    #[tokio::test]
    async fn logs_arguments_follow_options() {
        let (runner, engine) = engine(vec![ScriptedResponse::ok("")]);
        let options = LogsOptions {
            tail: 20,
            since: Some("2024-01-01T00:00:00Z".to_string()),
            timestamps: true,
        };
        engine.logs("web", &options).await.unwrap();
        assert_eq!(
            runner.invocations()[0],
            vec![
                "logs",
                "--timestamps",
                "--tail",
                "20",
                "--since",
                "2024-01-01T00:00:00Z",
                "web"
            ]
        );
    }
}
