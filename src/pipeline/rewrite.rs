//! Relocate every embedded image of a Markdown document into the MediaStore.
//!
//! ## Steps
//!
//! 1. **Scan** - find every `![alt](target)` in document order.
//! 2. **Classify** each *distinct* target, in first-occurrence order:
//!    absolute http(s) URLs are remote, `scheme:` targets and URLs the store
//!    already serves pass through, everything else is a path relative to the
//!    media root.
//! 3. **Resolve and upload** - download or read the bytes, then `put` them
//!    as `image_{n}{ext}`. Targets run with bounded concurrency; one failing
//!    image never fails the document.
//! 4. **Substitute** - once every target has been attempted, replace the
//!    target inside each matched image with its permanent URL. Only the
//!    target span of a match changes, so all other text stays byte-identical
//!    and a target that is a substring of another is never touched twice.

use crate::error::{ImageError, ParseError};
use crate::output::{ResolvedImage, RewriteOutcome};
use crate::progress::PipelineProgressCallback;
use crate::store::{extension_of, MediaStore};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// `![alt](body)`. The target is cut out of `body` by [`target_range`].
static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap());

/// A trailing `"title"` or `'title'` after the target.
static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\s+(?:"[^"]*"|'[^']*')$"#).unwrap());

/// A URI scheme prefix such as `data:` or `ftp:`.
static RE_SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").unwrap());

/// One occurrence of image syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub alt_text: String,
    pub target: String,
}

/// Every image occurrence in document order, repeats included.
///
/// Targets may contain spaces (`![](my figure.png)`), be wrapped in angle
/// brackets, or be followed by a quoted title.
pub fn scan_images(markdown: &str) -> Vec<ImageReference> {
    RE_IMAGE
        .captures_iter(markdown)
        .filter_map(|c| {
            let span = target_span(&c)?;
            Some(ImageReference {
                alt_text: c[1].to_string(),
                target: markdown[span].to_string(),
            })
        })
        .collect()
}

/// Target within the parenthesised body of an image, relative to the body.
///
/// Surrounding whitespace, `<...>` brackets and a trailing title are not
/// part of the target. `None` when nothing is left.
fn target_range(body: &str) -> Option<Range<usize>> {
    let start = body.len() - body.trim_start().len();
    let rest = body[start..].trim_end();
    if let Some(inner) = rest.strip_prefix('<') {
        let end = inner.find('>')?;
        return (end > 0).then(|| start + 1..start + 1 + end);
    }
    let end = match RE_TITLE.find(rest) {
        Some(title) if title.start() > 0 => title.start(),
        _ => rest.len(),
    };
    (end > 0).then(|| start..start + end)
}

/// Byte range of the target of one `RE_IMAGE` match, in haystack offsets.
fn target_span(caps: &Captures<'_>) -> Option<Range<usize>> {
    let body = caps.get(2)?;
    let range = target_range(body.as_str())?;
    Some(body.start() + range.start..body.start() + range.end)
}

/// Distinct targets in first-occurrence order, with the alt text of that occurrence.
pub fn distinct_targets(refs: &[ImageReference]) -> Vec<&ImageReference> {
    let mut seen = HashSet::new();
    refs.iter()
        .filter(|r| seen.insert(r.target.as_str()))
        .collect()
}

// ── Classification ───────────────────────────────────────────────────────

/// Where the bytes of a target come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Already permanent, inline, or not ours to move.
    PassThrough,
    /// Absolute http(s) URL to download.
    Remote(String),
    /// Path relative to the media root.
    Local(PathBuf),
}

/// Classify one target.
///
/// Local targets are normalised lexically; one that would leave the media
/// root becomes [`ImageError::OutsideMediaRoot`].
pub fn classify(
    target: &str,
    store: &dyn MediaStore,
    temporary_hosts: &[String],
) -> Result<ImageSource, ImageError> {
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        if store.owns_url(target) {
            return Ok(ImageSource::PassThrough);
        }
        if !temporary_hosts.is_empty() && !is_temporary_host(target, temporary_hosts) {
            return Ok(ImageSource::PassThrough);
        }
        return Ok(ImageSource::Remote(target.to_string()));
    }
    if RE_SCHEME.is_match(target) || target.starts_with("//") {
        return Ok(ImageSource::PassThrough);
    }

    normalise_relative(target)
        .map(ImageSource::Local)
        .ok_or_else(|| ImageError::OutsideMediaRoot {
            target: target.to_string(),
        })
}

fn is_temporary_host(url: &str, suffixes: &[String]) -> bool {
    let Some(host) = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    else {
        return false;
    };
    suffixes.iter().any(|s| {
        let s = s.trim().trim_start_matches('.').to_ascii_lowercase();
        !s.is_empty() && (host == s || host.ends_with(&format!(".{s}")))
    })
}

/// Resolve `.` and `..` without touching the filesystem.
///
/// `None` when the path is absolute or climbs above its starting point.
fn normalise_relative(target: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(target).components() {
        match component {
            Component::Normal(p) => parts.push(p),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().collect())
}

/// Extension hint for a target: last path segment, query and fragment stripped.
fn target_extension(target: &str) -> &str {
    let path = target.split(['?', '#']).next().unwrap_or(target);
    let segment = path.rsplit('/').next().unwrap_or(path);
    extension_of(segment)
}

// ── Rewriter ─────────────────────────────────────────────────────────────

/// Per-document rewrite settings.
pub struct MediaRewriter<'a> {
    pub store: &'a dyn MediaStore,
    pub client: &'a reqwest::Client,
    pub namespace: &'a str,
    pub scope: &'a str,
    pub image_concurrency: usize,
    pub temporary_image_hosts: &'a [String],
    pub fail_on_storage_outage: bool,
    pub progress: &'a dyn PipelineProgressCallback,
}

/// One target scheduled for download or read, then upload.
struct Relocation<'r> {
    index: usize,
    reference: &'r ImageReference,
    origin: Origin,
}

enum Origin {
    Remote(String),
    File { root: PathBuf, path: PathBuf },
}

impl MediaRewriter<'_> {
    /// Rewrite `markdown`, resolving relative targets against `media_root`.
    ///
    /// Fails only when a relative target appears without a media root, or
    /// when every attempted upload failed and `fail_on_storage_outage` is set.
    pub async fn rewrite(
        &self,
        markdown: &str,
        media_root: Option<&Path>,
    ) -> Result<RewriteOutcome, ParseError> {
        let refs = scan_images(markdown);
        if refs.is_empty() {
            debug!("No image references found");
            return Ok(RewriteOutcome {
                markdown: markdown.to_string(),
                ..RewriteOutcome::default()
            });
        }

        let distinct = distinct_targets(&refs);
        let mut failures: Vec<ImageError> = Vec::new();
        let mut plan: Vec<Relocation<'_>> = Vec::new();
        for &reference in &distinct {
            let origin = match classify(&reference.target, self.store, self.temporary_image_hosts)
            {
                Ok(ImageSource::PassThrough) => {
                    debug!("Leaving image '{}' as is", reference.target);
                    continue;
                }
                Ok(ImageSource::Remote(url)) => Origin::Remote(url),
                Ok(ImageSource::Local(rel)) => match media_root {
                    Some(root) => Origin::File {
                        root: root.to_path_buf(),
                        path: root.join(rel),
                    },
                    None => {
                        return Err(ParseError::MissingMediaRoot {
                            target: reference.target.clone(),
                        })
                    }
                },
                Err(e) => {
                    warn!("{}", e);
                    self.progress.on_image_failed(e.target(), &e.to_string());
                    failures.push(e);
                    continue;
                }
            };
            plan.push(Relocation {
                index: plan.len() + 1,
                reference,
                origin,
            });
        }

        let attempted = plan.len();
        info!(
            "Relocating {} of {} distinct image target(s) ({} occurrence(s))",
            attempted,
            distinct.len(),
            refs.len()
        );

        let results: Vec<Result<ResolvedImage, ImageError>> = stream::iter(plan)
            .map(|item| self.relocate(item))
            .buffered(self.image_concurrency.max(1))
            .collect()
            .await;

        let mut images = Vec::new();
        let mut upload_attempts = 0usize;
        let mut upload_failures: Vec<&ImageError> = Vec::new();
        for result in &results {
            match result {
                Ok(image) => {
                    upload_attempts += 1;
                    images.push(image.clone());
                }
                Err(e) if e.is_upload_failure() => {
                    upload_attempts += 1;
                    upload_failures.push(e);
                }
                Err(_) => {}
            }
        }

        if self.fail_on_storage_outage
            && upload_attempts > 0
            && upload_failures.len() == upload_attempts
        {
            return Err(ParseError::Storage {
                store: self.store.name().to_string(),
                attempted: upload_attempts,
                first_error: upload_failures[0].to_string(),
            });
        }

        failures.extend(results.into_iter().filter_map(Result::err));

        let by_target: HashMap<&str, &str> = images
            .iter()
            .map(|i| (i.target.as_str(), i.url.as_str()))
            .collect();
        let rewritten = substitute(markdown, &by_target);

        info!(
            "Relocated {}/{} image(s), {} left unchanged",
            images.len(),
            attempted,
            failures.len()
        );
        Ok(RewriteOutcome {
            markdown: rewritten,
            images,
            failures,
        })
    }

    async fn relocate(&self, item: Relocation<'_>) -> Result<ResolvedImage, ImageError> {
        let target = item.reference.target.as_str();
        let result = self.relocate_one(&item).await;
        match &result {
            Ok(image) => {
                debug!("Image {} '{}' → {}", image.index, target, image.url);
                self.progress.on_image_resolved(target, &image.url);
            }
            Err(e) => {
                warn!("{}; leaving reference unchanged", e);
                self.progress.on_image_failed(target, &e.to_string());
            }
        }
        result
    }

    async fn relocate_one(&self, item: &Relocation<'_>) -> Result<ResolvedImage, ImageError> {
        let target = item.reference.target.as_str();
        let bytes = match &item.origin {
            Origin::Remote(url) => self.download(target, url).await?,
            Origin::File { root, path } => read_local(target, root, path).await?,
        };

        let hint = format!("image_{}{}", item.index, target_extension(target));
        let url = self
            .store
            .put(&bytes, self.namespace, self.scope, &hint)
            .await
            .map_err(|e| ImageError::Upload {
                target: target.to_string(),
                detail: e.to_string(),
            })?;

        Ok(ResolvedImage {
            index: item.index,
            alt_text: item.reference.alt_text.clone(),
            target: target.to_string(),
            url,
        })
    }

    async fn download(&self, target: &str, url: &str) -> Result<Vec<u8>, ImageError> {
        let fail = |detail: String| ImageError::Download {
            target: target.to_string(),
            detail,
        };
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {status}")));
        }
        let bytes = resp.bytes().await.map_err(|e| fail(e.to_string()))?;
        if bytes.is_empty() {
            return Err(fail("empty body".into()));
        }
        Ok(bytes.to_vec())
    }
}

/// Read `path` after resolving links; the file must still lie below `root`.
async fn read_local(target: &str, root: &Path, path: &Path) -> Result<Vec<u8>, ImageError> {
    let io_error = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ImageError::MissingFile {
                target: target.to_string(),
                path: path.to_path_buf(),
            }
        } else {
            ImageError::Read {
                target: target.to_string(),
                detail: e.to_string(),
            }
        }
    };

    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| ImageError::Read {
            target: target.to_string(),
            detail: format!("media root {}: {e}", root.display()),
        })?;
    let resolved = tokio::fs::canonicalize(path).await.map_err(io_error)?;
    if !resolved.starts_with(&root) {
        return Err(ImageError::OutsideMediaRoot {
            target: target.to_string(),
        });
    }
    tokio::fs::read(&resolved).await.map_err(io_error)
}

/// Replace the target span of every matched image whose target has a URL.
fn substitute(markdown: &str, urls: &HashMap<&str, &str>) -> String {
    if urls.is_empty() {
        return markdown.to_string();
    }
    RE_IMAGE
        .replace_all(markdown, |caps: &Captures| {
            let whole = &caps[0];
            let Some(span) = target_span(caps) else {
                return whole.to_string();
            };
            match urls.get(&markdown[span.clone()]) {
                Some(url) => {
                    let offset = caps.get(0).map_or(0, |m| m.start());
                    let (from, to) = (span.start - offset, span.end - offset);
                    format!("{}{}{}", &whole[..from], url, &whole[to..])
                }
                None => whole.to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::progress::NoopProgressCallback;
    use crate::store::object_key;
    use async_trait::async_trait;
    use mockito::Matcher;
    use std::sync::Mutex;

    /// In-memory store recording every `put`.
    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingStore {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn put_count(&self) -> usize {
            self.puts.lock().unwrap().len()
        }

        fn hints(&self) -> Vec<String> {
            self.puts.lock().unwrap().iter().map(|(_, h)| h.clone()).collect()
        }
    }

    #[async_trait]
    impl MediaStore for RecordingStore {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn put(
            &self,
            bytes: &[u8],
            namespace: &str,
            scope: &str,
            suggested_name: &str,
        ) -> Result<String, StoreError> {
            if self.fail {
                return Err(StoreError::Http {
                    operation: "PUT".into(),
                    status: 503,
                    body: "down".into(),
                });
            }
            let key = object_key(bytes, suggested_name);
            self.puts
                .lock()
                .unwrap()
                .push((key.clone(), suggested_name.to_string()));
            Ok(format!("https://store.test/{namespace}/{scope}/{key}"))
        }

        async fn delete_scope(&self, _namespace: &str, _scope: &str) -> usize {
            0
        }

        fn owns_url(&self, url: &str) -> bool {
            url.starts_with("https://store.test/")
        }
    }

    fn rewriter<'a>(
        store: &'a RecordingStore,
        client: &'a reqwest::Client,
        hosts: &'a [String],
    ) -> MediaRewriter<'a> {
        MediaRewriter {
            store,
            client,
            namespace: "kb",
            scope: "doc",
            image_concurrency: 3,
            temporary_image_hosts: hosts,
            fail_on_storage_outage: true,
            progress: &NoopProgressCallback,
        }
    }

    fn media_dir(files: &[(&str, &[u8])]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, data) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }
        dir
    }

    #[test]
    fn scan_keeps_order_and_repeats() {
        let md = "a ![x](1.png) b ![](2.jpg \"Title\") c ![x](1.png) [link](3.png)";
        let refs = scan_images(md);
        let targets: Vec<&str> = refs.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["1.png", "2.jpg", "1.png"]);
        assert_eq!(distinct_targets(&refs).len(), 2);
    }

    #[test]
    fn scan_accepts_spaces_brackets_and_titles() {
        let md = concat!(
            "![a](my figure.png) ",
            "![b]( <other file.jpg> \"Cap\") ",
            "![c](plain.png 'single') ",
            "![d](   ) ",
            "![e](\"quoted.png\")",
        );
        let targets: Vec<String> = scan_images(md).into_iter().map(|r| r.target).collect();
        assert_eq!(
            targets,
            vec!["my figure.png", "other file.jpg", "plain.png", "\"quoted.png\""]
        );
    }

    #[test]
    fn substitution_replaces_only_the_target_span() {
        let urls: HashMap<&str, &str> = [
            ("my figure.png", "https://store.test/1.png"),
            ("other file.jpg", "https://store.test/2.jpg"),
        ]
        .into_iter()
        .collect();
        let md = "x ![a]( my figure.png \"Fig 1\" ) y ![b](<other file.jpg>) z ![c](keep.png)";

        assert_eq!(
            substitute(md, &urls),
            "x ![a]( https://store.test/1.png \"Fig 1\" ) y ![b](<https://store.test/2.jpg>) z ![c](keep.png)"
        );
    }

    #[test]
    fn classification() {
        let store = RecordingStore::default();
        let none: Vec<String> = vec![];
        assert_eq!(
            classify("https://vendor.example.com/a.png", &store, &none).unwrap(),
            ImageSource::Remote("https://vendor.example.com/a.png".into())
        );
        assert_eq!(
            classify("https://store.test/kb/doc/x.png", &store, &none).unwrap(),
            ImageSource::PassThrough
        );
        assert_eq!(
            classify("data:image/png;base64,AAAA", &store, &none).unwrap(),
            ImageSource::PassThrough
        );
        assert_eq!(
            classify("./images/../images/a.png", &store, &none).unwrap(),
            ImageSource::Local(PathBuf::from("images/a.png"))
        );
        assert!(matches!(
            classify("../outside.png", &store, &none),
            Err(ImageError::OutsideMediaRoot { .. })
        ));
        assert!(matches!(
            classify("/etc/passwd", &store, &none),
            Err(ImageError::OutsideMediaRoot { .. })
        ));

        let hosts = vec!["oss-cn-hangzhou.aliyuncs.com".to_string()];
        assert!(matches!(
            classify("https://bucket.oss-cn-hangzhou.aliyuncs.com/t.png?Expires=1", &store, &hosts).unwrap(),
            ImageSource::Remote(_)
        ));
        assert_eq!(
            classify("https://upload.wikimedia.org/a.png", &store, &hosts).unwrap(),
            ImageSource::PassThrough
        );
    }

    #[test]
    fn extension_comes_from_last_segment_without_query() {
        assert_eq!(target_extension("https://host/path/pic.JPEG?sig=abc"), ".JPEG");
        assert_eq!(target_extension("images/a.webp#frag"), ".webp");
        assert_eq!(target_extension("https://host/v1.2/render?id=3"), ".png");
        assert_eq!(target_extension("noext"), ".png");
    }

    #[tokio::test]
    async fn repeated_target_is_uploaded_once() {
        let store = RecordingStore::default();
        let client = reqwest::Client::new();
        let media = media_dir(&[("img1.png", b"deadbeef-image")]);

        let out = rewriter(&store, &client, &[])
            .rewrite("See ![a](img1.png) and again ![a](img1.png).", Some(media.path()))
            .await
            .unwrap();

        assert_eq!(store.put_count(), 1);
        let url = format!(
            "https://store.test/kb/doc/{}",
            object_key(b"deadbeef-image", "image_1.png")
        );
        assert_eq!(out.markdown, format!("See ![a]({url}) and again ![a]({url})."));
        assert_eq!(out.urls(), vec![url.as_str()]);
        assert!(out.failures.is_empty());
    }

    #[tokio::test]
    async fn all_resolvable_targets_are_replaced() {
        let store = RecordingStore::default();
        let client = reqwest::Client::new();
        let media = media_dir(&[
            ("images/a.png", b"a"),
            ("images/b.jpg", b"b"),
            ("images/c.gif", b"c"),
        ]);
        let md = "# T\n![one](images/a.png)\ntext ![two](images/b.jpg)\n![three](images/c.gif)\n";

        let out = rewriter(&store, &client, &[])
            .rewrite(md, Some(media.path()))
            .await
            .unwrap();

        assert_eq!(out.images.len(), 3);
        for target in ["images/a.png", "images/b.jpg", "images/c.gif"] {
            assert!(!out.markdown.contains(target), "{target} still present");
        }
        let indices: Vec<usize> = out.images.iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(out.images[1].alt_text, "two");
        assert_eq!(store.hints(), vec!["image_1.png", "image_2.jpg", "image_3.gif"]);
        assert!(out.markdown.starts_with("# T\n![one](https://store.test/kb/doc/"));
    }

    #[tokio::test]
    async fn one_missing_file_leaves_only_that_reference() {
        let store = RecordingStore::default();
        let client = reqwest::Client::new();
        let media = media_dir(&[("a.png", b"a"), ("c.png", b"c")]);
        let md = "![](a.png) ![](missing.png) ![](c.png)";

        let out = rewriter(&store, &client, &[])
            .rewrite(md, Some(media.path()))
            .await
            .unwrap();

        assert_eq!(out.images.len(), 2);
        assert!(out.markdown.contains("![](missing.png)"));
        assert_eq!(out.failures.len(), 1);
        assert!(matches!(out.failures[0], ImageError::MissingFile { .. }));
    }

    #[tokio::test]
    async fn substring_targets_do_not_collide() {
        let store = RecordingStore::default();
        let client = reqwest::Client::new();
        let media = media_dir(&[("a.png", b"first"), ("images/a.png", b"second")]);
        let md = "![](images/a.png) then ![](a.png)";

        let out = rewriter(&store, &client, &[])
            .rewrite(md, Some(media.path()))
            .await
            .unwrap();

        let first = object_key(b"second", "x.png");
        let second = object_key(b"first", "x.png");
        assert_eq!(
            out.markdown,
            format!(
                "![](https://store.test/kb/doc/{first}) then ![](https://store.test/kb/doc/{second})"
            )
        );
    }

    #[tokio::test]
    async fn remote_image_keeps_extension_case() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/path/pic.JPEG")
            .match_query(Matcher::UrlEncoded("sig".into(), "abc".into()))
            .with_body("jpeg!")
            .expect(1)
            .create_async()
            .await;

        let store = RecordingStore::default();
        let client = reqwest::Client::new();
        let target = format!("{}/path/pic.JPEG?sig=abc", server.url());
        let md = format!("![p]({target}) ![p]({target})");

        let out = rewriter(&store, &client, &[]).rewrite(&md, None).await.unwrap();

        m.assert_async().await;
        assert_eq!(store.hints(), vec!["image_1.JPEG"]);
        assert!(out.images[0].url.ends_with(".JPEG"));
        assert!(!out.markdown.contains("sig=abc"));
    }

    #[tokio::test]
    async fn failed_download_is_non_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/gone.png")
            .with_status(404)
            .create_async()
            .await;

        let store = RecordingStore::default();
        let client = reqwest::Client::new();
        let md = format!("![x]({}/gone.png)", server.url());

        let out = rewriter(&store, &client, &[]).rewrite(&md, None).await.unwrap();
        assert_eq!(out.markdown, md);
        assert!(matches!(out.failures[0], ImageError::Download { .. }));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn pass_through_and_outside_root_are_untouched() {
        let store = RecordingStore::default();
        let client = reqwest::Client::new();
        let media = media_dir(&[]);
        let md = "![](data:image/png;base64,AAA=) ![](https://store.test/kb/doc/x.png) ![](../../etc/passwd)";

        let out = rewriter(&store, &client, &[])
            .rewrite(md, Some(media.path()))
            .await
            .unwrap();

        assert_eq!(out.markdown, md);
        assert!(out.images.is_empty());
        assert!(matches!(out.failures.as_slice(), [ImageError::OutsideMediaRoot { .. }]));
    }

    #[tokio::test]
    async fn local_file_name_with_spaces_is_relocated() {
        let store = RecordingStore::default();
        let client = reqwest::Client::new();
        let media = media_dir(&[("images/page 1 fig.png", b"spaced")]);
        let md = "![Figure](images/page 1 fig.png \"Figure 1\")";

        let out = rewriter(&store, &client, &[])
            .rewrite(md, Some(media.path()))
            .await
            .unwrap();

        let url = format!(
            "https://store.test/kb/doc/{}",
            object_key(b"spaced", "x.png")
        );
        assert_eq!(out.markdown, format!("![Figure]({url} \"Figure 1\")"));
        assert_eq!(out.images[0].target, "images/page 1 fig.png");
        assert!(out.failures.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_media_root_is_not_read() {
        let outside = media_dir(&[("secret.png", b"private")]);
        let media = media_dir(&[("ok.png", b"fine")]);
        std::os::unix::fs::symlink(
            outside.path().join("secret.png"),
            media.path().join("leak.png"),
        )
        .unwrap();
        std::os::unix::fs::symlink(outside.path(), media.path().join("up")).unwrap();

        let store = RecordingStore::default();
        let client = reqwest::Client::new();
        let md = "![](leak.png) ![](up/secret.png) ![](ok.png)";

        let out = rewriter(&store, &client, &[])
            .rewrite(md, Some(media.path()))
            .await
            .unwrap();

        assert_eq!(store.put_count(), 1);
        assert_eq!(out.images.len(), 1);
        assert_eq!(out.images[0].target, "ok.png");
        assert!(out.markdown.starts_with("![](leak.png) ![](up/secret.png) ![](https://store.test/"));
        assert_eq!(out.failures.len(), 2);
        assert!(out
            .failures
            .iter()
            .all(|f| matches!(f, ImageError::OutsideMediaRoot { .. })));
    }

    #[tokio::test]
    async fn zero_images_returns_content_unchanged() {
        let store = RecordingStore::default();
        let client = reqwest::Client::new();
        let md = "# Title\n\nNo pictures, just [a link](x.png).\n";

        let out = rewriter(&store, &client, &[]).rewrite(md, None).await.unwrap();
        assert_eq!(out.markdown, md);
        assert!(out.urls().is_empty());
    }

    #[tokio::test]
    async fn local_target_without_media_root_is_an_error() {
        let store = RecordingStore::default();
        let client = reqwest::Client::new();

        let err = rewriter(&store, &client, &[])
            .rewrite("![](images/a.png)", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ParseError::MissingMediaRoot { .. }));
    }

    #[tokio::test]
    async fn store_outage_fails_document_unless_tolerated() {
        let store = RecordingStore::failing();
        let client = reqwest::Client::new();
        let media = media_dir(&[("a.png", b"a"), ("b.png", b"b")]);
        let md = "![](a.png) ![](b.png)";

        let err = rewriter(&store, &client, &[])
            .rewrite(md, Some(media.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ParseError::Storage { attempted: 2, .. }), "{err:?}");

        let mut tolerant = rewriter(&store, &client, &[]);
        tolerant.fail_on_storage_outage = false;
        let out = tolerant.rewrite(md, Some(media.path())).await.unwrap();
        assert_eq!(out.markdown, md);
        assert_eq!(out.failures.len(), 2);
        assert!(out.failures.iter().all(ImageError::is_upload_failure));
    }
}
