//! Validating uploaded files and placing them inside a container.
//!
//! An upload is sniffed from its first bytes, renamed to a safe file name,
//! staged in a private temp directory and then copied into the protocol's
//! content root with `container cp`. The staging directory is removed when the
//! [`StagedUpload`] is dropped.

use crate::catalog::ServerKind;
use crate::engine::EngineCli;
use crate::env::upload::{MAX_STEM_LEN, SNIFF_LEN};
use crate::error::{Result, ServerError};
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::LazyLock;
use tempfile::TempDir;
use tracing::info;

static UNSAFE_CHARS: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]"));

/// Content types accepted for upload.
pub const ALLOWED_CONTENT_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "application/pdf",
    "text/plain",
    "text/html",
];

const HTML_TAGS: [&[u8]; 17] = [
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

fn is_html(data: &[u8]) -> bool {
    HTML_TAGS.iter().any(|tag| {
        data.len() > tag.len()
            && data[..tag.len()].eq_ignore_ascii_case(tag)
            && matches!(data[tag.len()], b' ' | b'>')
    })
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

/// Guess a content type from the leading bytes of a file.
pub fn sniff_content_type(head: &[u8]) -> &'static str {
    let head = &head[..head.len().min(SNIFF_LEN)];

    if head.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png";
    }
    if head.starts_with(b"\xFF\xD8\xFF") {
        return "image/jpeg";
    }

    let trimmed = match head.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(start) => &head[start..],
        None => &[],
    };
    if is_html(trimmed) {
        return "text/html";
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml";
    }
    if head.starts_with(b"\xEF\xBB\xBF") || head.starts_with(b"\xFE\xFF") || head.starts_with(b"\xFF\xFE") {
        return "text/plain";
    }
    if head.iter().copied().any(is_binary_byte) {
        return "application/octet-stream";
    }
    "text/plain"
}

pub fn is_allowed(content_type: &str) -> bool {
    ALLOWED_CONTENT_TYPES.contains(&content_type)
}

pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "application/pdf" => ".pdf",
        "text/plain" => ".txt",
        "text/html" => ".html",
        _ => "",
    }
}

fn sanitize(part: &str) -> Result<String> {
    let pattern = UNSAFE_CHARS
        .as_ref()
        .map_err(|e| ServerError::InvalidInput(format!("file name pattern: {}", e)))?;
    Ok(pattern.replace_all(part, "_").into_owned())
}

/// Build a file name from `[A-Za-z0-9._-]` only, with the stem capped at 64
/// characters and the extension taken from the content type when missing.
pub fn safe_name(raw: &str, content_type: &str) -> Result<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let (stem, extension) = match base.rfind('.') {
        Some(dot) if dot > 0 => (&base[..dot], &base[dot..]),
        _ => (base, ""),
    };

    let mut stem = sanitize(stem)?;
    stem.truncate(MAX_STEM_LEN);
    if stem.chars().all(|c| c == '.') {
        stem = "upload".to_string();
    }

    let extension = if extension.chars().all(|c| c == '.') {
        extension_for(content_type).to_string()
    } else {
        sanitize(extension)?
    };
    Ok(format!("{}{}", stem, extension))
}

/// A validated file waiting in a private temp directory.
#[derive(Debug)]
pub struct StagedUpload {
    _dir: TempDir,
    pub path: PathBuf,
    pub safe_name: String,
    pub size: u64,
    pub content_type: &'static str,
}

/// Where a deployed upload ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Validate and stage an uploaded file.
///
/// # Errors
///
/// `InvalidInput` for empty or oversize files and disallowed content types.
pub async fn stage(raw_name: &str, data: &[u8], max_bytes: u64) -> Result<StagedUpload> {
    if data.is_empty() {
        return Err(ServerError::InvalidInput("missing file".to_string()));
    }
    let size = data.len() as u64;
    if size > max_bytes {
        return Err(ServerError::InvalidInput(format!(
            "file too large: {} bytes exceeds {}",
            size, max_bytes
        )));
    }

    let content_type = sniff_content_type(data);
    if !is_allowed(content_type) {
        return Err(ServerError::InvalidInput(format!(
            "file type not allowed: {}",
            content_type
        )));
    }

    let safe_name = safe_name(raw_name, content_type)?;
    let dir = tempfile::Builder::new().prefix("sts-upload-").tempdir()?;
    let path = dir.path().join(&safe_name);
    tokio::fs::write(&path, data).await?;

    Ok(StagedUpload {
        _dir: dir,
        path,
        safe_name,
        size,
        content_type,
    })
}

/// Copy a staged upload into `kind`'s content root inside `container`.
pub async fn deploy(
    engine: &EngineCli,
    container: &str,
    kind: ServerKind,
    staged: &StagedUpload,
) -> Result<String> {
    let root = kind.content_root().ok_or_else(|| {
        ServerError::InvalidInput(format!("{} does not accept uploads", kind))
    })?;
    let destination = format!("{}/{}", root, staged.safe_name);

    engine
        .copy_into(&staged.path, container, &destination)
        .await?;
    info!(
        "Uploaded {} ({} bytes, {}) to {}:{}",
        staged.safe_name, staged.size, staged.content_type, container, destination
    );
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn sniffs_known_signatures() {
        assert_eq!(sniff_content_type(b"%PDF-1.7 ..."), "application/pdf");
        assert_eq!(sniff_content_type(b"\x89PNG\r\n\x1a\n\0\0"), "image/png");
        assert_eq!(sniff_content_type(b"\xFF\xD8\xFF\xE0"), "image/jpeg");
        assert_eq!(sniff_content_type(b"GIF89a..."), "image/gif");
        assert_eq!(sniff_content_type(b"  <!doctype html><p>hi"), "text/html");
        assert_eq!(sniff_content_type(b"hello world\n"), "text/plain");
        assert_eq!(sniff_content_type(b"\x7fELF\x02\x01\x01\0"), "application/octet-stream");
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(safe_name("my report (final).pdf", "application/pdf").unwrap(), "my_report__final_.pdf");
        assert_eq!(safe_name("../../etc/passwd", "text/plain").unwrap(), "passwd.txt");
        assert_eq!(safe_name("C:\\Users\\me\\notes", "text/plain").unwrap(), "notes.txt");
        assert_eq!(safe_name("", "image/png").unwrap(), "upload.png");
        assert_eq!(safe_name("..", "text/plain").unwrap(), "upload.txt");
        assert_eq!(safe_name("x/..", "text/plain").unwrap(), "upload.txt");
        assert_eq!(safe_name("...", "image/png").unwrap(), "upload.png");

        let long = format!("{}.html", "a".repeat(100));
        let name = safe_name(&long, "text/html").unwrap();
        assert_eq!(name.len(), MAX_STEM_LEN + ".html".len());
    }

    #[tokio::test]
    async fn stage_enforces_limits() {
        let err = stage("big.txt", &[b'a'; 32], 16).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = stage("tool", b"\x7fELF\x02\x01\x01\0", 1024).await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));

        let err = stage("empty.txt", b"", 1024).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn dot_dot_name_stages_inside_its_directory() {
        let staged = stage("..", b"hello world\n", 1024).await.unwrap();
        assert_eq!(staged.safe_name, "upload.txt");
        assert!(staged.path.is_file());
        assert_eq!(tokio::fs::read(&staged.path).await.unwrap(), b"hello world\n");
    }

    #[tokio::test]
    async fn staged_file_is_removed_on_drop() {
        let staged = stage("index", b"<html><body>hi</body></html>", 1024)
            .await
            .unwrap();
        assert_eq!(staged.safe_name, "index.html");
        assert_eq!(staged.size, 28);
        assert!(staged.path.exists());

        let path = staged.path.clone();
        drop(staged);
        assert!(!path.exists());
    }
}
