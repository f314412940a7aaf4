//! MediaStore: upload bytes, get back a permanent URL.
//!
//! Objects are content-addressed: the key of an image is
//! `{namespace}/{scope}/{content_hash}{ext}`, so storing the same bytes twice
//! under the same scope always yields the same URL.
//!
//! | Variant | Write | Scope delete |
//! |---|---|---|
//! | [`BucketStore`] | `PUT` into a flat object space | one prefix `DELETE` |
//! | [`ContentApiStore`] | create-file on a versioned content host | list, then delete each |

pub mod bucket;
pub mod content_api;

pub use bucket::BucketStore;
pub use content_api::ContentApiStore;

use crate::config::{PipelineConfig, StorageKind};
use crate::error::StoreError;
use crate::hash::content_hash;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Extension used when the suggested name carries none.
pub const DEFAULT_EXTENSION: &str = ".png";

/// A permanent home for re-hosted images.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Short name for logs and errors.
    fn name(&self) -> &'static str;

    /// Store `bytes` under `namespace`/`scope` and return the permanent URL.
    ///
    /// Only the extension of `suggested_name` is used; the object name is the
    /// content hash. Repeating a call with identical bytes returns the same URL.
    async fn put(
        &self,
        bytes: &[u8],
        namespace: &str,
        scope: &str,
        suggested_name: &str,
    ) -> Result<String, StoreError>;

    /// Remove every object under `namespace`/`scope`, returning how many went.
    ///
    /// Best-effort: failures are logged and reported as zero removals.
    async fn delete_scope(&self, namespace: &str, scope: &str) -> usize;

    /// Whether `url` already points into this store.
    fn owns_url(&self, url: &str) -> bool;
}

/// Build the store selected by `config.storage`.
pub fn build_store(config: &PipelineConfig, client: reqwest::Client) -> Arc<dyn MediaStore> {
    match config.storage {
        StorageKind::Bucket => Arc::new(BucketStore::new(client, config.bucket.clone())),
        StorageKind::ContentApi => {
            Arc::new(ContentApiStore::new(client, config.content_api.clone()))
        }
    }
}

// ── Naming ───────────────────────────────────────────────────────────────

static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[A-Za-z0-9]{2,5}$").unwrap());

/// Extension of `name` including the dot, or [`DEFAULT_EXTENSION`].
///
/// Case is preserved: `pic.JPEG` yields `.JPEG`.
pub fn extension_of(name: &str) -> &str {
    EXTENSION_RE
        .find(name)
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_EXTENSION)
}

/// `content_hash(bytes)` followed by the extension of `suggested_name`.
pub fn object_key(bytes: &[u8], suggested_name: &str) -> String {
    format!("{}{}", content_hash(bytes), extension_of(suggested_name))
}

/// Make a namespace or scope safe to use as one path segment.
///
/// Characters outside `[A-Za-z0-9_-]` and the CJK block U+4E00–U+9FA5
/// become `_`. An empty segment becomes `default`.
pub fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || is_cjk(c) {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

pub(crate) fn is_cjk(c: char) -> bool {
    ('\u{4E00}'..='\u{9FA5}').contains(&c)
}

/// `{namespace}/{scope}` with both segments sanitised.
pub fn scope_path(namespace: &str, scope: &str) -> String {
    format!("{}/{}", sanitize_segment(namespace), sanitize_segment(scope))
}

/// MIME type for an object key, by extension (case-insensitive).
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
