//! Log output parsing and line pumping.

use crate::env::introspection::MAX_LINE_LEN;
use crate::error::{Result, ServerError};
use crate::executor::{ExecutorError, OutputStream, StreamingChild};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "line")]
    pub text: String,
}

/// Result of a bounded log read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTail {
    pub lines: Vec<LogLine>,
    pub truncated: bool,
    #[serde(rename = "container_running")]
    pub running: bool,
}

impl LogTail {
    /// Turn a tail read from a stopped container into `NotRunning`.
    pub fn ensure_running(self, container: &str) -> Result<Self> {
        if self.running {
            Ok(self)
        } else {
            Err(ServerError::NotRunning(container.to_string()))
        }
    }
}

fn cap(text: &str) -> &str {
    if text.len() <= MAX_LINE_LEN {
        return text;
    }
    let mut end = MAX_LINE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn leading_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let mut fields = text.split_whitespace();
    let first = fields.next()?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(first) {
        return Some(ts.with_timezone(&Utc));
    }

    let second = fields.next()?;
    let pair = format!("{} {}", first, second);
    ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"]
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(&pair, layout).ok())
        .map(|naive| naive.and_utc())
}

/// Parse combined log output.
///
/// Lines keep their order. Each is capped at 8192 bytes and stamped with its
/// leading timestamp, or `now` when none is recognized. `truncated` is set
/// when at least `tail` lines came back.
pub fn parse_log_output(output: &str, tail: usize, now: DateTime<Utc>) -> (Vec<LogLine>, bool) {
    let lines: Vec<LogLine> = output
        .lines()
        .map(|line| {
            let text = cap(line);
            LogLine {
                timestamp: leading_timestamp(text).unwrap_or(now),
                text: text.to_string(),
            }
        })
        .collect();
    let truncated = lines.len() >= tail;
    (lines, truncated)
}

/// Receives streamed lines.
#[async_trait]
pub trait LineSink: Send + Sync {
    /// Deliver one line. Returns `false` once the receiving side is gone.
    async fn send_line(&self, line: String) -> bool;
}

#[async_trait]
impl LineSink for mpsc::Sender<String> {
    async fn send_line(&self, line: String) -> bool {
        self.send(line).await.is_ok()
    }
}

/// Read one line, keeping at most `max` bytes of it. Returns `false` at EOF.
pub async fn read_capped_line<R>(reader: &mut R, line: &mut Vec<u8>, max: usize) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let mut read_any = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read_any);
        }
        read_any = true;

        let (chunk, consumed, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (&available[..i], i + 1, true),
            None => (available, available.len(), false),
        };
        let room = max.saturating_sub(line.len());
        line.extend_from_slice(&chunk[..chunk.len().min(room)]);
        reader.consume(consumed);

        if complete {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(true);
        }
    }
}

async fn forward_lines(
    stream: OutputStream,
    sink: Arc<dyn LineSink>,
    stop: CancellationToken,
    missing: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    loop {
        let read = tokio::select! {
            _ = stop.cancelled() => return,
            read = read_capped_line(&mut reader, &mut buffer, MAX_LINE_LEN) => read,
        };
        match read {
            Ok(true) => {
                let line = String::from_utf8_lossy(&buffer).into_owned();
                if line.to_lowercase().contains("no such container") {
                    missing.store(true, Ordering::Relaxed);
                }
                let delivered = tokio::select! {
                    _ = stop.cancelled() => return,
                    delivered = sink.send_line(line) => delivered,
                };
                if !delivered {
                    debug!("Line sink closed, stopping stream");
                    stop.cancel();
                    return;
                }
            }
            Ok(false) => return,
            Err(e) => {
                debug!("Stream read failed: {}", e);
                return;
            }
        }
    }
}

/// Multiplex a child's two output streams into `sink` until the process
/// exits or `cancel` fires.
///
/// Both reader tasks have finished by the time this returns. Lines within one
/// stream keep their order; no order holds across the two streams.
///
/// # Errors
///
/// `Cancelled` when `cancel` fired (including a closed sink), `NotFound`
/// when the engine reported an unknown container, `ExternalProcess` for any
/// other non-zero exit.
pub async fn pump(
    child: StreamingChild,
    sink: Arc<dyn LineSink>,
    cancel: CancellationToken,
    description: &str,
) -> Result<()> {
    let StreamingChild {
        stdout,
        stderr,
        exit,
    } = child;
    let missing = Arc::new(AtomicBool::new(false));

    let readers = [
        tokio::spawn(forward_lines(stdout, sink.clone(), cancel.clone(), missing.clone())),
        tokio::spawn(forward_lines(stderr, sink, cancel.clone(), missing.clone())),
    ];

    let status: Option<std::result::Result<i32, ExecutorError>> = tokio::select! {
        _ = cancel.cancelled() => None,
        status = exit => Some(status),
    };

    for reader in readers {
        if let Err(e) = reader.await {
            debug!("Stream reader task failed: {}", e);
        }
    }

    match status {
        None | Some(Err(ExecutorError::Cancelled)) => Err(ServerError::Cancelled),
        Some(Ok(0)) => Ok(()),
        Some(Ok(code)) if missing.load(Ordering::Relaxed) => {
            debug!("{} exited with {} for a missing container", description, code);
            Err(ServerError::NotFound(format!("container for {}", description)))
        }
        Some(Ok(code)) => Err(ServerError::ExternalProcess {
            command: description.to_string(),
            output: format!("exited with code {}", code),
        }),
        Some(Err(e)) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn tail_heuristic_keeps_every_line() {
        let output: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        let (lines, truncated) = parse_log_output(&output, 50, fixed_now());
        assert_eq!(lines.len(), 100);
        assert!(truncated);

        let (lines, truncated) = parse_log_output("a\nb\n", 50, fixed_now());
        assert_eq!(lines.len(), 2);
        assert!(!truncated);
    }

    #[test]
    fn recognizes_leading_timestamps() {
        let output = "2024-05-01T10:00:00.123456789Z GET /index.html\n\
                      2024-05-01 10:00:01 second layout\n\
                      2024/05/01 10:00:02 third layout\n";
        let (lines, _) = parse_log_output(output, 10, fixed_now());

        assert_eq!(
            lines[0].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
                + chrono::Duration::nanoseconds(123_456_789)
        );
        assert_eq!(
            lines[1].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 1).unwrap()
        );
        assert_eq!(
            lines[2].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 2).unwrap()
        );
        assert_eq!(lines[0].text, "2024-05-01T10:00:00.123456789Z GET /index.html");
    }

    #[test]
    fn unstamped_lines_fall_back_to_now() {
        let (lines, _) = parse_log_output("nginx started\n\n", 10, fixed_now());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].timestamp, fixed_now());
    }

    #[test]
    fn long_lines_are_capped() {
        let long = "x".repeat(MAX_LINE_LEN + 100);
        let (lines, _) = parse_log_output(&long, 1, fixed_now());
        assert_eq!(lines[0].text.len(), MAX_LINE_LEN);
    }

    #[tokio::test]
    async fn capped_reader_discards_overflow() {
        let data = format!("{}\nshort\r\ntail", "y".repeat(20));
        let mut reader = BufReader::with_capacity(4, Cursor::new(data.into_bytes()));
        let mut line = Vec::new();

        assert!(read_capped_line(&mut reader, &mut line, 8).await.unwrap());
        assert_eq!(line, b"yyyyyyyy");
        assert!(read_capped_line(&mut reader, &mut line, 8).await.unwrap());
        assert_eq!(line, b"short");
        assert!(read_capped_line(&mut reader, &mut line, 8).await.unwrap());
        assert_eq!(line, b"tail");
        assert!(!read_capped_line(&mut reader, &mut line, 8).await.unwrap());
    }

    #[tokio::test]
    async fn pump_forwards_both_streams() {
        let child = StreamingChild {
            stdout: Box::pin(Cursor::new(b"out 1\nout 2\n".to_vec())),
            stderr: Box::pin(Cursor::new(b"err 1\n".to_vec())),
            exit: Box::pin(async { Ok::<i32, ExecutorError>(0) }),
        };
        let (sender, mut receiver) = mpsc::channel(16);

        pump(child, Arc::new(sender), CancellationToken::new(), "logs -f web")
            .await
            .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = receiver.recv().await {
            lines.push(line);
        }
        lines.sort();
        assert_eq!(lines, vec!["err 1", "out 1", "out 2"]);
    }

    #[tokio::test]
    async fn pump_maps_missing_container() {
        let child = StreamingChild {
            stdout: Box::pin(Cursor::new(Vec::new())),
            stderr: Box::pin(Cursor::new(b"Error: No such container: web\n".to_vec())),
            exit: Box::pin(async { Ok::<i32, ExecutorError>(1) }),
        };
        let (sender, _receiver) = mpsc::channel(16);

        let err = pump(child, Arc::new(sender), CancellationToken::new(), "logs -f web")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn pump_returns_when_sink_stalls_after_cancel() {
        let lines: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        let (stderr, _stderr_writer) = tokio::io::duplex(64);
        let child = StreamingChild {
            stdout: Box::pin(Cursor::new(lines.into_bytes())),
            stderr: Box::pin(stderr),
            exit: Box::pin(futures::future::pending::<std::result::Result<i32, ExecutorError>>()),
        };
        // Capacity one and never read: the reader parks on its second send.
        let (sender, _receiver) = mpsc::channel::<String>(1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            pump(child, Arc::new(sender), cancel, "logs -f web"),
        )
        .await
        .expect("pump should return once cancelled");
        assert_eq!(outcome.unwrap_err().kind(), ErrorKind::Cancelled);
    }
}
