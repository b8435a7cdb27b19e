//! Looking inside running test-server containers.
//!
//! [`Introspector`] lists directories under a protocol's content root, reads
//! bounded log tails and follows live output. Parsing lives in the pure
//! [`listing`] and [`logs`] modules so it can be tested without an engine.

use crate::catalog::ServerKind;
use crate::engine::{EngineCli, LogsOptions};
use crate::env::introspection::{DEFAULT_RAW_TAIL, DEFAULT_TAIL, MAX_TAIL, STREAM_TAIL_SEED};
use crate::env::timeouts;
use crate::error::{Result, ServerError};
use crate::store::ContainerStore;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod listing;
pub mod logs;

pub use listing::{FileEntry, FileKind, Listing, parse_listing, validate_relative_path};
pub use logs::{LineSink, LogLine, LogTail, parse_log_output};

/// Clamp a requested tail into `[1, 5000]`, with 0 meaning the default.
pub fn clamp_tail(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_TAIL,
        n => n.min(MAX_TAIL),
    }
}

fn missing_container(output: &str) -> bool {
    output.to_lowercase().contains("no such container")
}

/// Directory listings and logs for running containers.
#[derive(Clone)]
pub struct Introspector {
    engine: EngineCli,
    store: Arc<dyn ContainerStore>,
}

impl Introspector {
    pub fn new(engine: EngineCli, store: Arc<dyn ContainerStore>) -> Self {
        Self { engine, store }
    }

    /// List the immediate children of `relative` under `kind`'s content root.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for absolute or `..` paths (checked before any engine
    /// call), `InvalidInput` for protocols without a content root,
    /// `NotFound` for unknown containers, `ExternalProcess` when neither the
    /// `find` listing nor its shell fallback works.
    pub async fn list_dir(
        &self,
        container: &str,
        kind: ServerKind,
        relative: &str,
        max_entries: usize,
    ) -> Result<Listing> {
        validate_relative_path(relative)?;
        let root = kind.content_root().ok_or_else(|| {
            ServerError::InvalidInput(format!("{} has no browsable content root", kind))
        })?;

        self.engine.inspect(container).await?;

        let target = listing::target_path(root, relative);
        let primary = listing::find_command(&target);
        let result = self
            .engine
            .exec(container, &primary, timeouts::DIR_LISTING, None)
            .await?;

        let raw = if result.success() {
            result.stdout
        } else {
            let output = result.combined();
            if !listing::needs_fallback(&output) {
                return Err(ServerError::ExternalProcess {
                    command: primary.join(" "),
                    output,
                });
            }

            debug!("find lacks -printf in {}, using shell fallback", container);
            let fallback = listing::fallback_command(&target);
            let result = self
                .engine
                .exec(container, &fallback, timeouts::DIR_LISTING, None)
                .await?;
            if !result.success() {
                return Err(ServerError::ExternalProcess {
                    command: "sh -c <listing fallback>".to_string(),
                    output: result.combined(),
                });
            }
            result.stdout
        };

        Ok(parse_listing(raw.trim(), root, max_entries))
    }

    /// Read the last `tail` log lines of a container recorded as `expected`.
    ///
    /// Lines are returned even when the container is not running or not of
    /// the expected kind; [`LogTail::running`] reports that, and
    /// [`LogTail::ensure_running`] turns it into `NotRunning`.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown containers, `Timeout` after 10 s.
    pub async fn fetch_logs(
        &self,
        container: &str,
        expected: ServerKind,
        tail: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogTail> {
        let record = self.store.get(container).await?;
        let tail = clamp_tail(tail);

        let options = LogsOptions {
            tail,
            since: since.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            timestamps: false,
        };
        let result = self.engine.logs(&record.name, &options).await?;
        if !result.success() {
            let output = result.combined();
            if missing_container(&output) {
                return Err(ServerError::NotFound(format!("container {}", container)));
            }
            return Err(ServerError::ExternalProcess {
                command: format!("logs --tail {} {}", tail, record.name),
                output,
            });
        }

        let (lines, truncated) =
            parse_log_output(&format!("{}{}", result.stdout, result.stderr), tail, Utc::now());
        let running = record.is_running() && record.server_type == expected.tag();
        Ok(LogTail {
            lines,
            truncated,
            running,
        })
    }

    /// Raw `logs --timestamps` output; `lines` defaults to 200.
    pub async fn tail_raw(&self, container: &str, lines: usize) -> Result<String> {
        let tail = if lines == 0 { DEFAULT_RAW_TAIL } else { lines.min(MAX_TAIL) };
        let options = LogsOptions {
            tail,
            since: None,
            timestamps: true,
        };
        let result = self.engine.logs(container, &options).await?;
        if result.success() {
            return Ok(format!("{}{}", result.stdout, result.stderr));
        }

        let output = result.combined();
        if missing_container(&output) {
            Err(ServerError::NotFound(format!("container {}", container)))
        } else {
            Err(ServerError::ExternalProcess {
                command: format!("logs --timestamps --tail {} {}", tail, container),
                output,
            })
        }
    }

    /// Follow a recorded container's logs into `sink` until the process ends
    /// or `cancel` fires.
    pub async fn stream_logs(
        &self,
        container: &str,
        sink: Arc<dyn LineSink>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let record = self.store.get(container).await?;
        info!("Streaming logs of {}", record.name);

        let child = self
            .engine
            .follow_logs(&record.name, STREAM_TAIL_SEED, cancel.clone())
            .await?;
        logs::pump(child, sink, cancel, &format!("logs -f {}", record.name)).await
    }

    /// Follow a command running inside a recorded container.
    pub async fn stream_exec(
        &self,
        container: &str,
        argv: &[String],
        sink: Arc<dyn LineSink>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let record = self.store.get(container).await?;
        let child = self
            .engine
            .exec_streaming(&record.name, argv, cancel.clone())
            .await?;
        logs::pump(child, sink, cancel, &format!("exec {} {}", record.name, argv.join(" "))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::executor::{ScriptedExecutor, ScriptedResponse};
    use crate::store::{ContainerRecord, ContainerStatus, InMemoryStore};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn introspector(
        responses: Vec<ScriptedResponse>,
        status: ContainerStatus,
    ) -> (Arc<ScriptedExecutor>, Introspector) {
        let runner = Arc::new(ScriptedExecutor::with_responses(responses));
        let store = Arc::new(InMemoryStore::new());
        store
            .create(ContainerRecord {
                id: "c0ffee".to_string(),
                name: "simple-test-server-web-0".to_string(),
                image: "simple-test-server-custom-nginx:latest".to_string(),
                created_at: 0,
                environment: BTreeMap::new(),
                ports: BTreeMap::from([(80, 8080)]),
                volumes: BTreeMap::new(),
                networks: vec!["host".to_string()],
                status,
                server_type: "WEB".to_string(),
            })
            .await
            .unwrap();
        let engine = EngineCli::new(runner.clone(), "docker");
        (runner, Introspector::new(engine, store))
    }

    #[tokio::test]
    async fn invalid_paths_never_reach_the_engine() {
        let (runner, introspector) = introspector(vec![], ContainerStatus::Running).await;
        for bad in ["../etc", "/etc"] {
            let err = introspector
                .list_dir("c0ffee", ServerKind::Web, bad, 0)
                .await
                .unwrap_err();
            assert!(matches!(err, ServerError::InvalidPath(_)));
        }
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn listing_falls_back_when_printf_is_missing() {
        let (runner, introspector) = introspector(
            vec![
                ScriptedResponse::ok("[]"),
                ScriptedResponse::failure(1, "find: unrecognized: -printf"),
                ScriptedResponse::ok("f|12|0.0|/shares/readme.txt\n"),
            ],
            ContainerStatus::Running,
        )
        .await;

        let listing = introspector
            .list_dir("c0ffee", ServerKind::Smb, "", 10)
            .await
            .unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].relative_path, "readme.txt");
        assert_eq!(runner.invocations()[2][2], "sh");
    }

    #[tokio::test]
    async fn listing_unknown_container_is_not_found() {
        let (_, introspector) = introspector(
            vec![ScriptedResponse::failure(1, "Error: No such object: x")],
            ContainerStatus::Running,
        )
        .await;
        let err = introspector
            .list_dir("x", ServerKind::Web, "", 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn stopped_container_still_returns_lines() {
        let (runner, introspector) = introspector(
            vec![ScriptedResponse::ok("GET / 200\nGET /a 404\n")],
            ContainerStatus::Discarded,
        )
        .await;

        let tail = introspector
            .fetch_logs("c0ffee", ServerKind::Web, 0, None)
            .await
            .unwrap();
        assert_eq!(tail.lines.len(), 2);
        assert!(!tail.running);
        assert_eq!(
            tail.clone().ensure_running("c0ffee").unwrap_err().kind(),
            ErrorKind::NotRunning
        );
        assert_eq!(
            runner.invocations()[0],
            vec!["logs", "--tail", "500", "simple-test-server-web-0"]
        );
    }

    #[tokio::test]
    async fn unknown_record_is_not_found_before_engine_call() {
        let (runner, introspector) = introspector(vec![], ContainerStatus::Running).await;
        let err = introspector
            .fetch_logs("ghost", ServerKind::Web, 10, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn tail_is_clamped() {
        assert_eq!(clamp_tail(0), 500);
        assert_eq!(clamp_tail(20_000), 5000);
        assert_eq!(clamp_tail(7), 7);
    }

    #[tokio::test]
    async fn cancelled_stream_returns_after_readers_finish() {
        let (_, introspector) = introspector(
            vec![ScriptedResponse::hanging("seed line\n", "")],
            ContainerStatus::Running,
        )
        .await;
        let (sender, mut receiver) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let session = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                introspector
                    .stream_logs("c0ffee", Arc::new(sender), cancel)
                    .await
            })
        };

        assert_eq!(receiver.recv().await.as_deref(), Some("seed line"));
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(receiver.recv().await, None);
    }
}
