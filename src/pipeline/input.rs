//! Source intake: validate the uploaded document and derive its names.
//!
//! Validation runs before anything touches the network so a bad upload
//! costs no backend quota. The sanitised document id doubles as the
//! MediaStore scope, which keeps every image of one document under one
//! deletable prefix.

use crate::backend::SourceDocument;
use crate::config::SourceLimits;
use crate::error::ParseError;
use crate::store::is_cjk;
use chrono::{DateTime, Local};
use std::path::Path;
use tracing::{debug, info};

/// Longest document id, in characters.
pub const MAX_DOCUMENT_ID_CHARS: usize = 50;

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Lower-cased extension of `file_name`, without the dot.
pub fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name.trim())
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Reject empty, unnamed, disallowed or oversized sources.
///
/// Returns the lower-cased extension on success.
pub fn validate_source(
    bytes: &[u8],
    file_name: &str,
    limits: &SourceLimits,
) -> Result<String, ParseError> {
    if file_name.trim().is_empty() {
        return Err(ParseError::InvalidFileName {
            file_name: file_name.to_string(),
        });
    }
    let ext = extension(file_name).ok_or_else(|| ParseError::InvalidFileName {
        file_name: file_name.to_string(),
    })?;

    if !limits
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    {
        return Err(ParseError::UnsupportedFileType {
            extension: ext,
            allowed: limits.allowed_extensions.join(", "),
        });
    }

    if bytes.is_empty() {
        return Err(ParseError::EmptySource {
            file_name: file_name.to_string(),
        });
    }

    let size = bytes.len() as u64;
    if size > limits.max_size_bytes() {
        return Err(ParseError::SourceTooLarge {
            size,
            max_mb: limits.max_size_mb,
        });
    }

    debug!("Accepted '{}' ({} bytes, .{})", file_name, size, ext);
    Ok(ext)
}

/// Derive a path-safe document id from a file name.
///
/// The extension is dropped, whitespace runs become `_`, anything outside
/// `[A-Za-z0-9_-]` and CJK ideographs becomes `_`, runs of `_` collapse and
/// leading/trailing `_` are trimmed. The result is cut to
/// [`MAX_DOCUMENT_ID_CHARS`]; an empty result falls back to `doc-<unix-millis>`.
pub fn sanitize_document_id(file_name: &str) -> String {
    let name = file_name.trim();
    let stem = match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    };

    let mut id = String::with_capacity(stem.len());
    for c in stem.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '-' || is_cjk(c) {
            c
        } else {
            '_'
        };
        if mapped == '_' && id.ends_with('_') {
            continue;
        }
        id.push(mapped);
    }

    let id: String = id.trim_matches('_').chars().take(MAX_DOCUMENT_ID_CHARS).collect();
    let id = id.trim_end_matches('_').to_string();
    if id.is_empty() {
        format!("doc-{}", chrono::Utc::now().timestamp_millis())
    } else {
        id
    }
}

/// Name of the scratch copy of a source: `<id>_<yyyyMMdd_HHmmss>.<ext>`.
pub fn scratch_file_name(document_id: &str, ext: &str, at: DateTime<Local>) -> String {
    format!("{}_{}.{}", document_id, at.format("%Y%m%d_%H%M%S"), ext)
}

/// Load a source document from a local path or an http(s) URL.
///
/// Used by the CLI; library callers usually already hold the bytes.
pub async fn load_source(
    input: &str,
    client: &reqwest::Client,
) -> Result<SourceDocument, ParseError> {
    if is_url(input) {
        download_source(input, client).await
    } else {
        let path = Path::new(input);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ParseError::io(format!("read {}", path.display()), e))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        debug!("Loaded local source {}", path.display());
        Ok(SourceDocument { bytes, file_name })
    }
}

async fn download_source(
    url: &str,
    client: &reqwest::Client,
) -> Result<SourceDocument, ParseError> {
    info!("Downloading source from: {}", url);
    let operation = format!("download {url}");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ParseError::network(operation.clone(), e))?;
    if !response.status().is_success() {
        return Err(ParseError::Network {
            operation,
            detail: format!("HTTP {}", response.status()),
            timed_out: false,
        });
    }

    let file_name = file_name_from_url(url);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ParseError::network(operation, e))?;

    Ok(SourceDocument {
        bytes: bytes.to_vec(),
        file_name,
    })
}

/// Last path segment of a URL when it looks like a file name.
fn file_name_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}
