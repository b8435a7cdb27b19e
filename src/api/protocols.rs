//! Per-protocol file trees, logs, uploads and captured mail.

use super::AppState;
use crate::catalog::ServerKind;
use crate::error::{Result, ServerError};
use crate::introspection::Listing;
use crate::mail::{DEFAULT_LIMIT, MAILHOG_API_PORT, MAX_LIMIT, MailSummary};
use crate::store::ContainerRecord;
use crate::upload::{self, UploadOutcome};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

/// Container port nginx serves uploaded content on.
const WEB_CONTENT_PORT: u16 = 80;

/// Look up a container and check it belongs to `kind`.
pub(super) async fn record_for(
    state: &AppState,
    id: &str,
    kind: ServerKind,
) -> Result<ContainerRecord> {
    let record = state.orchestrator.store().get(id).await?;
    if record.server_type != kind.tag() {
        return Err(ServerError::InvalidInput(format!(
            "container {} is a {} server, not {}",
            id, record.server_type, kind
        )));
    }
    Ok(record)
}

#[derive(Debug, Default, Deserialize)]
pub struct FileTreeQuery {
    #[serde(default)]
    path: String,
    #[serde(default)]
    max: usize,
}

pub async fn file_tree(
    State(state): State<AppState>,
    Extension(kind): Extension<ServerKind>,
    Path(id): Path<String>,
    Query(query): Query<FileTreeQuery>,
) -> Result<Json<Listing>> {
    let record = record_for(&state, &id, kind).await?;
    let listing = state
        .introspector
        .list_dir(&record.name, kind, &query.path, query.max)
        .await?;
    Ok(Json(listing))
}

#[derive(Debug, Default, Deserialize)]
pub struct RawLogsQuery {
    #[serde(default)]
    lines: usize,
}

pub async fn raw_logs(
    State(state): State<AppState>,
    Extension(kind): Extension<ServerKind>,
    Path(id): Path<String>,
    Query(query): Query<RawLogsQuery>,
) -> Result<Json<serde_json::Value>> {
    let record = record_for(&state, &id, kind).await?;
    let logs = state.introspector.tail_raw(&record.name, query.lines).await?;
    Ok(Json(json!({ "logs": logs })))
}

#[derive(Debug, Default, Deserialize)]
pub struct AccessLogsQuery {
    #[serde(default)]
    tail: usize,
    since: Option<String>,
}

fn parse_since(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.filter(|s| !s.is_empty())
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| ServerError::InvalidInput(format!("since: {}", e)))
        })
        .transpose()
}

/// Bounded log tail; a stopped container still returns its lines with 409.
pub async fn access_logs(
    State(state): State<AppState>,
    Extension(kind): Extension<ServerKind>,
    Path(id): Path<String>,
    Query(query): Query<AccessLogsQuery>,
) -> Result<Response> {
    let since = parse_since(query.since.as_deref())?;
    let tail = state
        .introspector
        .fetch_logs(&id, kind, query.tail, since)
        .await?;

    if tail.running {
        return Ok(Json(tail).into_response());
    }
    Ok((
        StatusCode::CONFLICT,
        Json(json!({
            "error": "container not running",
            "lines": tail.lines,
            "truncated": tail.truncated,
            "container_running": false,
        })),
    )
        .into_response())
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ServerError {
    ServerError::InvalidInput(format!("multipart: {}", err.body_text()))
}

/// Accept a `file` multipart field and copy it into the content root.
pub async fn upload(
    State(state): State<AppState>,
    Extension(kind): Extension<ServerKind>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadOutcome>)> {
    let record = record_for(&state, &id, kind).await?;
    let max_bytes = state.config.upload_max_bytes;

    let mut file = None;
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if (data.len() + chunk.len()) as u64 > max_bytes {
                return Err(ServerError::InvalidInput(format!(
                    "file too large: limit is {} bytes",
                    max_bytes
                )));
            }
            data.extend_from_slice(&chunk);
        }
        file = Some((name, data));
        break;
    }

    let (name, data) =
        file.ok_or_else(|| ServerError::InvalidInput("missing file".to_string()))?;
    let staged = upload::stage(&name, &data, max_bytes).await?;
    let path = upload::deploy(&state.engine, &record.name, kind, &staged).await?;

    let url = (kind == ServerKind::Web).then(|| {
        format!(
            "http://localhost:{}/{}",
            record.host_port(WEB_CONTENT_PORT),
            staged.safe_name
        )
    });

    Ok((
        StatusCode::CREATED,
        Json(UploadOutcome {
            path,
            size: staged.size,
            url,
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct MailQuery {
    limit: Option<usize>,
}

async fn mail_port(state: &AppState, id: &str) -> Result<u16> {
    let record = record_for(state, id, ServerKind::Mail).await?;
    if !record.is_running() {
        return Err(ServerError::NotRunning(record.name));
    }
    Ok(record.host_port(MAILHOG_API_PORT))
}

pub async fn mail_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MailQuery>,
) -> Result<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ServerError::InvalidInput(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }

    let port = mail_port(&state, &id).await?;
    let emails = state.mail.messages(port, limit).await?;
    Ok(Json(json!({ "emails": emails })))
}

pub async fn mail_message(
    State(state): State<AppState>,
    Path((id, message_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    let port = mail_port(&state, &id).await?;
    let message: MailSummary = state.mail.message(port, &message_id).await?;
    Ok(Json(json!({ "message": message })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn since_accepts_rfc3339_or_nothing() {
        assert_eq!(parse_since(None).unwrap(), None);
        assert_eq!(parse_since(Some("")).unwrap(), None);

        let parsed = parse_since(Some("2024-05-01T10:00:00+02:00")).unwrap().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-05-01T08:00:00+00:00");

        let err = parse_since(Some("yesterday")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
