//! WebSocket streams: MQTT traffic and collector logs.
//!
//! Each session owns a child of the shutdown token. A reader task cancels it
//! when the client closes; a failed write cancels it too, which stops the
//! engine process behind the stream.

use super::AppState;
use super::protocols::record_for;
use crate::catalog::ServerKind;
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::introspection::LineSink;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{Future, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Dev UI origin accepted in the dev environment.
const DEV_UI_ORIGIN: &str = "http://localhost:5173";

/// Whether a WebSocket upgrade from `origin` is acceptable.
///
/// Requests without an `Origin` header come from non-browser clients and are
/// accepted. Browsers must match the service's own address, a configured
/// origin, or the dev UI when running in dev.
pub fn origin_allowed(config: &ServiceConfig, origin: Option<&str>) -> bool {
    let Some(origin) = origin.map(|o| o.trim_end_matches('/')) else {
        return true;
    };
    if origin == format!("http://{}:{}", config.host, config.port) {
        return true;
    }
    if config.is_dev() && origin == DEV_UI_ORIGIN {
        return true;
    }
    config
        .allowed_origins
        .iter()
        .any(|allowed| allowed.trim_end_matches('/') == origin)
}

fn check_origin(config: &ServiceConfig, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if origin_allowed(config, origin) {
        Ok(())
    } else {
        warn!("Rejected WebSocket origin {:?}", origin);
        Err(super::error::reject(StatusCode::FORBIDDEN, "origin not allowed"))
    }
}

struct SocketSink {
    sender: Mutex<SplitSink<WebSocket, Message>>,
    cancel: CancellationToken,
}

#[async_trait]
impl LineSink for SocketSink {
    async fn send_line(&self, line: String) -> bool {
        let mut sender = self.sender.lock().await;
        if let Err(e) = sender.send(Message::Text(line.into())).await {
            debug!("WebSocket write failed: {}", e);
            self.cancel.cancel();
            return false;
        }
        true
    }
}

/// Run `stream` against the socket until it ends, the client leaves or the
/// service shuts down.
async fn serve_socket<F, Fut>(socket: WebSocket, shutdown: CancellationToken, label: String, stream: F)
where
    F: FnOnce(Arc<dyn LineSink>, CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let (sender, mut receiver) = socket.split();
    let cancel = shutdown.child_token();
    let sink = Arc::new(SocketSink {
        sender: Mutex::new(sender),
        cancel: cancel.clone(),
    });

    let reader_cancel = cancel.clone();
    let reader = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_cancel.cancelled() => break,
                message = receiver.next() => match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        reader_cancel.cancel();
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    });

    info!("WebSocket session opened: {}", label);
    match stream(sink.clone() as Arc<dyn LineSink>, cancel.clone()).await {
        Ok(()) => info!("WebSocket session ended: {}", label),
        Err(e) if cancel.is_cancelled() => debug!("WebSocket session {} cancelled: {}", label, e),
        Err(e) => {
            warn!("WebSocket session {} failed: {}", label, e);
            sink.send_line(format!("error: {}", e)).await;
        }
    }

    cancel.cancel();
    let _ = reader.await;
    let _ = sink.sender.lock().await.close().await;
}

/// Subscribe to every topic on the broker and forward `topic payload` lines.
pub async fn mqtt_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(rejection) = check_origin(&state.config, &headers) {
        return rejection;
    }
    let record = match record_for(&state, &id, ServerKind::Mqtt).await {
        Ok(record) => record,
        Err(e) => return e.into_response(),
    };

    let credential = |key: &str| record.environment.get(key).cloned().unwrap_or_default();
    let argv: Vec<String> = vec![
        "mosquitto_sub".to_string(),
        "-v".to_string(),
        "-t".to_string(),
        "#".to_string(),
        "-u".to_string(),
        credential("MQTT_USERNAME"),
        "-P".to_string(),
        credential("MQTT_PASSWORD"),
    ];

    let introspector = state.introspector.clone();
    let shutdown = state.shutdown.clone();
    let container = record.id.clone();
    ws.on_upgrade(move |socket| async move {
        serve_socket(socket, shutdown, format!("mqtt {}", container), |sink, cancel| async move {
            introspector.stream_exec(&container, &argv, sink, cancel).await
        })
        .await
    })
}

/// Follow the collector's container logs.
pub async fn otel_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(rejection) = check_origin(&state.config, &headers) {
        return rejection;
    }
    let record = match record_for(&state, &id, ServerKind::Otel).await {
        Ok(record) => record,
        Err(e) => return e.into_response(),
    };

    let introspector = state.introspector.clone();
    let shutdown = state.shutdown.clone();
    let container = record.id;
    ws.on_upgrade(move |socket| async move {
        serve_socket(socket, shutdown, format!("otel {}", container), |sink, cancel| async move {
            introspector.stream_logs(&container, sink, cancel).await
        })
        .await
    })
}
