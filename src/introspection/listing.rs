//! Directory listing output parsing.

use crate::env::introspection::DEFAULT_MAX_ENTRIES;
use crate::error::{Result, ServerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a listed directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    Unknown,
}

impl FileKind {
    fn from_letter(letter: &str) -> Self {
        match letter {
            "f" => FileKind::File,
            "d" => FileKind::Dir,
            "l" => FileKind::Symlink,
            _ => FileKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    /// Path relative to the protocol root
    #[serde(rename = "path")]
    pub relative_path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(rename = "size")]
    pub size_bytes: i64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Listing {
    pub entries: Vec<FileEntry>,
    pub truncated: bool,
}

/// Reject absolute paths and any `..` before the engine is involved.
pub fn validate_relative_path(relative: &str) -> Result<()> {
    if relative.starts_with('/') {
        return Err(ServerError::InvalidPath(format!(
            "{} must be relative",
            relative
        )));
    }
    if relative.contains("..") {
        return Err(ServerError::InvalidPath(format!(
            "{} must not contain '..'",
            relative
        )));
    }
    Ok(())
}

/// Directory inside the container that a relative path points at.
pub fn target_path(root: &str, relative: &str) -> String {
    let relative = relative.trim_matches('/');
    if relative.is_empty() || relative == "." {
        root.to_string()
    } else {
        format!("{}/{}", root.trim_end_matches('/'), relative)
    }
}

/// `find` invocation that prints `type|size|mtime|path` per child.
pub fn find_command(target: &str) -> Vec<String> {
    [
        "find",
        target,
        "-maxdepth",
        "1",
        "-mindepth",
        "1",
        "-printf",
        "%y|%s|%T@|%p\n",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Whether a failed `find` looks like one without `-printf` support.
pub fn needs_fallback(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("unrecognized -printf")
        || lower.contains("unknown primary")
        || lower.contains("-printf")
}

/// Portable `sh` loop producing the same record shape as [`find_command`],
/// with a zero modification time.
pub fn fallback_command(target: &str) -> Vec<String> {
    let quoted = shell_escape::unix::escape(target.into());
    let script = format!(
        concat!(
            "for f in {}/* ; do [ -e \"$f\" ] || continue ; t='?'; ",
            "if [ -d \"$f\" ]; then t='d'; elif [ -L \"$f\" ]; then t='l'; ",
            "elif [ -f \"$f\" ]; then t='f'; fi; s=0; ",
            "if [ -f \"$f\" ]; then s=$(wc -c <\"$f\" 2>/dev/null || echo 0); fi; ",
            "printf \"%s|%s|%s|%s\\n\" \"$t\" \"$s\" \"0.0\" \"$f\"; done"
        ),
        quoted
    );
    vec!["sh".to_string(), "-c".to_string(), script]
}

fn parse_mtime(raw: &str) -> DateTime<Utc> {
    let seconds: f64 = raw.trim().parse().unwrap_or(0.0);
    let whole = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1e9) as u32;
    DateTime::from_timestamp(whole, nanos).unwrap_or_default()
}

/// Parse listing output into entries.
///
/// Lines without four `|`-separated fields are skipped. At most
/// `max_entries` entries are returned (500 when zero); `truncated` is set
/// only when a further valid entry was dropped.
pub fn parse_listing(raw: &str, root: &str, max_entries: usize) -> Listing {
    let limit = if max_entries == 0 {
        DEFAULT_MAX_ENTRIES
    } else {
        max_entries
    };
    let root = root.trim_end_matches('/');

    let mut listing = Listing::default();
    for line in raw.lines() {
        let fields: Vec<&str> = line.splitn(4, '|').collect();
        let &[letter, size, mtime, path] = fields.as_slice() else {
            continue;
        };
        if listing.entries.len() >= limit {
            listing.truncated = true;
            break;
        }

        let relative_path = path
            .strip_prefix(root)
            .unwrap_or(path)
            .trim_start_matches('/')
            .to_string();
        let name = path.rsplit('/').next().unwrap_or(path).to_string();

        listing.entries.push(FileEntry {
            name,
            relative_path,
            kind: FileKind::from_letter(letter),
            size_bytes: size.trim().parse().unwrap_or(0),
            modified_at: parse_mtime(mtime),
        });
    }
    listing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const ROOT: &str = "/usr/share/nginx/html";

    fn records(n: usize) -> String {
        (0..n)
            .map(|i| format!("f|{}|1700000000.5|{}/file{}.txt\n", i, ROOT, i))
            .collect()
    }

    #[test]
    fn rejects_escaping_paths() {
        for bad in ["../etc", "/etc", "a/../../b"] {
            assert_eq!(
                validate_relative_path(bad).unwrap_err().kind(),
                ErrorKind::InvalidInput
            );
        }
        assert!(validate_relative_path("").is_ok());
        assert!(validate_relative_path("assets/img").is_ok());
    }

    #[test]
    fn parses_fields() {
        let raw = format!("d|4096|1700000000.25|{}/assets\nl|7|0.0|{}/link", ROOT, ROOT);
        let listing = parse_listing(&raw, ROOT, 10);

        assert!(!listing.truncated);
        let dir = &listing.entries[0];
        assert_eq!(dir.name, "assets");
        assert_eq!(dir.relative_path, "assets");
        assert_eq!(dir.kind, FileKind::Dir);
        assert_eq!(dir.size_bytes, 4096);
        assert_eq!(dir.modified_at.timestamp(), 1_700_000_000);
        assert_eq!(listing.entries[1].kind, FileKind::Symlink);
    }

    #[test]
    fn limits_and_flags_truncation() {
        let within = parse_listing(&records(5), ROOT, 5);
        assert_eq!(within.entries.len(), 5);
        assert!(!within.truncated);

        let over = parse_listing(&records(8), ROOT, 5);
        assert_eq!(over.entries.len(), 5);
        assert!(over.truncated);
    }

    #[test]
    fn zero_limit_means_default() {
        let listing = parse_listing(&records(DEFAULT_MAX_ENTRIES + 1), ROOT, 0);
        assert_eq!(listing.entries.len(), DEFAULT_MAX_ENTRIES);
        assert!(listing.truncated);
    }

    #[test]
    fn malformed_lines_do_not_count() {
        let raw = format!(
            "garbage\nf|1|0.0|{root}/a\nno|pipes\nf|2|0.0|{root}/b\n",
            root = ROOT
        );
        let listing = parse_listing(&raw, ROOT, 2);
        assert_eq!(listing.entries.len(), 2);
        assert!(!listing.truncated);
        assert_eq!(listing.entries[1].name, "b");
    }

    #[test]
    fn unknown_type_letters_are_kept() {
        let listing = parse_listing("?|0|0.0|/shares/pipe", "/shares", 10);
        assert_eq!(listing.entries[0].kind, FileKind::Unknown);
        assert_eq!(listing.entries[0].relative_path, "pipe");
    }

    #[test]
    fn fallback_quotes_target_and_keeps_glob() {
        let argv = fallback_command("/shares/my dir");
        assert_eq!(argv[0], "sh");
        assert!(argv[2].starts_with("for f in '/shares/my dir'/* ;"));
        assert!(needs_fallback("find: unrecognized: -printf"));
        assert!(!needs_fallback("No such file or directory"));
    }

    #[test]
    fn target_joins_under_root() {
        assert_eq!(target_path(ROOT, ""), ROOT);
        assert_eq!(target_path(ROOT, "assets/"), format!("{}/assets", ROOT));
    }
}
