//! Configuration types for document conversion and media relocation.
//!
//! Every knob lives in [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. The core never reads the environment; the CLI
//! (or any host application) maps its own settings into the builder.

use crate::error::ParseError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for a conversion pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use docparse_relay::{BackendKind, PipelineConfig, StorageKind};
///
/// let config = PipelineConfig::builder()
///     .backend(BackendKind::MinerU)
///     .mineru_token("tok")
///     .storage(StorageKind::Bucket)
///     .bucket_endpoint("https://objects.example.com")
///     .bucket_name("kb-images")
///     .poll_interval_ms(1500)
///     .build()
///     .unwrap();
/// assert_eq!(config.polling.interval_ms, 1500);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Which conversion backend handles the document. Default: DocParser.
    pub backend: BackendKind,

    /// Which MediaStore receives the re-hosted images. Default: Bucket.
    pub storage: StorageKind,

    /// First path segment of every stored object key. Default: `"default"`.
    pub namespace: String,

    /// Parent of the per-run scratch directories. Default: `<tmp>/docparse-relay`.
    pub scratch_dir: PathBuf,

    /// Images resolved and uploaded concurrently per document. Default: 4.
    pub image_concurrency: usize,

    /// Host suffixes whose remote images are re-hosted.
    ///
    /// Empty (the default) re-hosts every absolute http(s) image.
    pub temporary_image_hosts: Vec<String>,

    /// Fail the document when every attempted upload failed at the store. Default: true.
    pub fail_on_storage_outage: bool,

    /// Caller-level deadline for a whole run, in seconds. Default: none.
    pub deadline_secs: Option<u64>,

    pub polling: PollingConfig,
    pub docparser: DocParserConfig,
    pub mineru: MinerUConfig,
    pub bucket: BucketStoreConfig,
    pub content_api: ContentApiConfig,
    pub limits: SourceLimits,
    pub http: HttpConfig,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            storage: StorageKind::default(),
            namespace: "default".to_string(),
            scratch_dir: std::env::temp_dir().join("docparse-relay"),
            image_concurrency: 4,
            temporary_image_hosts: Vec::new(),
            fail_on_storage_outage: true,
            deadline_secs: None,
            polling: PollingConfig::default(),
            docparser: DocParserConfig::default(),
            mineru: MinerUConfig::default(),
            bucket: BucketStoreConfig::default(),
            content_api: ContentApiConfig::default(),
            limits: SourceLimits::default(),
            http: HttpConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("backend", &self.backend)
            .field("storage", &self.storage)
            .field("namespace", &self.namespace)
            .field("scratch_dir", &self.scratch_dir)
            .field("image_concurrency", &self.image_concurrency)
            .field("temporary_image_hosts", &self.temporary_image_hosts)
            .field("fail_on_storage_outage", &self.fail_on_storage_outage)
            .field("deadline_secs", &self.deadline_secs)
            .field("polling", &self.polling)
            .field("docparser", &self.docparser)
            .field("mineru", &self.mineru)
            .field("bucket", &self.bucket)
            .field("content_api", &self.content_api)
            .field("limits", &self.limits)
            .field("http", &self.http)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

fn redact(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

// ── Sub-configs ──────────────────────────────────────────────────────────

/// Poll pacing and bound for the job state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between two status polls, in milliseconds. Default: 3000.
    pub interval_ms: u64,
    /// Total status polls before the job is declared timed out. Default: 200.
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            max_attempts: 200,
        }
    }
}

/// Layout-result converter ("docparser") settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct DocParserConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    /// Ask the service to post-process layouts with a language model. Default: true.
    pub llm_enhancement: bool,
    /// Enhancement mode sent when `llm_enhancement` is on. Default: `"VLM"`.
    pub enhancement_mode: String,
    /// Render tables as HTML instead of Markdown. Default: false.
    pub output_html_table: bool,
    pub enable_formula: bool,
    pub enable_table: bool,
    pub enable_ocr: bool,
    /// Layout blocks requested per result page. Default: 1000.
    pub layout_step_size: u32,
}

impl Default for DocParserConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_token: None,
            llm_enhancement: true,
            enhancement_mode: "VLM".to_string(),
            output_html_table: false,
            enable_formula: true,
            enable_table: true,
            enable_ocr: false,
            layout_step_size: 1000,
        }
    }
}

impl fmt::Debug for DocParserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocParserConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &redact(&self.access_token))
            .field("llm_enhancement", &self.llm_enhancement)
            .field("enhancement_mode", &self.enhancement_mode)
            .field("output_html_table", &self.output_html_table)
            .field("enable_formula", &self.enable_formula)
            .field("enable_table", &self.enable_table)
            .field("enable_ocr", &self.enable_ocr)
            .field("layout_step_size", &self.layout_step_size)
            .finish()
    }
}

/// Archive converter ("mineru") settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct MinerUConfig {
    /// Default: `https://mineru.net/api/v4`.
    pub base_url: String,
    pub api_token: Option<String>,
    /// Default: `"vlm"`.
    pub model_version: String,
    pub enable_formula: bool,
    pub enable_table: bool,
    pub is_ocr: bool,
    /// Document language hint. Default: `"ch"`.
    pub language: String,
}

impl Default for MinerUConfig {
    fn default() -> Self {
        Self {
            base_url: "https://mineru.net/api/v4".to_string(),
            api_token: None,
            model_version: "vlm".to_string(),
            enable_formula: true,
            enable_table: true,
            is_ocr: false,
            language: "ch".to_string(),
        }
    }
}

impl fmt::Debug for MinerUConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinerUConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &redact(&self.api_token))
            .field("model_version", &self.model_version)
            .field("enable_formula", &self.enable_formula)
            .field("enable_table", &self.enable_table)
            .field("is_ocr", &self.is_ocr)
            .field("language", &self.language)
            .finish()
    }
}

/// Bucket-style object storage.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BucketStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_token: Option<String>,
    /// Custom public domain. When unset, URLs are `{endpoint}/{bucket}/{key}`.
    pub public_url: Option<String>,
}

impl fmt::Debug for BucketStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketStoreConfig")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("access_token", &redact(&self.access_token))
            .field("public_url", &self.public_url)
            .finish()
    }
}

/// Git-content-API-style storage served through a CDN.
#[derive(Clone, Serialize, Deserialize)]
pub struct ContentApiConfig {
    /// Default: `https://api.github.com`.
    pub api_base_url: String,
    pub token: Option<String>,
    /// `owner/name`.
    pub repo: String,
    /// Default: `"main"`.
    pub branch: String,
    /// Prepended to every object path. Default: `"images/"`.
    pub path_prefix: String,
    /// CDN host serving the repository. Default: `cdn.jsdelivr.net`.
    pub cdn: String,
}

impl Default for ContentApiConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com".to_string(),
            token: None,
            repo: String::new(),
            branch: "main".to_string(),
            path_prefix: "images/".to_string(),
            cdn: "cdn.jsdelivr.net".to_string(),
        }
    }
}

impl fmt::Debug for ContentApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentApiConfig")
            .field("api_base_url", &self.api_base_url)
            .field("token", &redact(&self.token))
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("path_prefix", &self.path_prefix)
            .field("cdn", &self.cdn)
            .finish()
    }
}

/// Accepted source documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLimits {
    /// Lower-case extensions without the dot. Default: pdf, doc, docx.
    pub allowed_extensions: Vec<String>,
    /// Default: 50.
    pub max_size_mb: u64,
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            allowed_extensions: vec!["pdf".into(), "doc".into(), "docx".into()],
            max_size_mb: 50,
        }
    }
}

impl SourceLimits {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }
}

/// Timeouts shared by every outbound HTTP call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Default: 30.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout. Default: 60.
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
        }
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self
    }

    pub fn storage(mut self, kind: StorageKind) -> Self {
        self.config.storage = kind;
        self
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.config.namespace = ns.into();
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = dir.into();
        self
    }

    pub fn image_concurrency(mut self, n: usize) -> Self {
        self.config.image_concurrency = n.clamp(1, 64);
        self
    }

    pub fn temporary_image_host(mut self, host_suffix: impl Into<String>) -> Self {
        self.config.temporary_image_hosts.push(host_suffix.into());
        self
    }

    pub fn fail_on_storage_outage(mut self, v: bool) -> Self {
        self.config.fail_on_storage_outage = v;
        self
    }

    pub fn deadline_secs(mut self, secs: u64) -> Self {
        self.config.deadline_secs = Some(secs.max(1));
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.polling.interval_ms = ms;
        self
    }

    pub fn max_poll_attempts(mut self, n: u32) -> Self {
        self.config.polling.max_attempts = n.max(1);
        self
    }

    pub fn docparser(mut self, cfg: DocParserConfig) -> Self {
        self.config.docparser = cfg;
        self
    }

    pub fn docparser_url(mut self, url: impl Into<String>) -> Self {
        self.config.docparser.base_url = url.into();
        self
    }

    pub fn docparser_token(mut self, token: impl Into<String>) -> Self {
        self.config.docparser.access_token = Some(token.into());
        self
    }

    pub fn layout_step_size(mut self, n: u32) -> Self {
        self.config.docparser.layout_step_size = n.clamp(1, 10_000);
        self
    }

    pub fn mineru(mut self, cfg: MinerUConfig) -> Self {
        self.config.mineru = cfg;
        self
    }

    pub fn mineru_url(mut self, url: impl Into<String>) -> Self {
        self.config.mineru.base_url = url.into();
        self
    }

    pub fn mineru_token(mut self, token: impl Into<String>) -> Self {
        self.config.mineru.api_token = Some(token.into());
        self
    }

    pub fn bucket(mut self, cfg: BucketStoreConfig) -> Self {
        self.config.bucket = cfg;
        self
    }

    pub fn bucket_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.bucket.endpoint = endpoint.into();
        self
    }

    pub fn bucket_name(mut self, bucket: impl Into<String>) -> Self {
        self.config.bucket.bucket = bucket.into();
        self
    }

    pub fn content_api(mut self, cfg: ContentApiConfig) -> Self {
        self.config.content_api = cfg;
        self
    }

    pub fn limits(mut self, limits: SourceLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn max_size_mb(mut self, mb: u64) -> Self {
        self.config.limits.max_size_mb = mb.max(1);
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http.connect_timeout_secs = secs.max(1);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http.request_timeout_secs = secs.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Only the selected backend and store must be fully configured.
    pub fn build(self) -> Result<PipelineConfig, ParseError> {
        let c = &self.config;
        if c.polling.max_attempts == 0 {
            return Err(ParseError::InvalidConfig(
                "max_poll_attempts must be ≥ 1".into(),
            ));
        }
        if c.image_concurrency == 0 {
            return Err(ParseError::InvalidConfig(
                "image_concurrency must be ≥ 1".into(),
            ));
        }
        if c.namespace.trim().is_empty() {
            return Err(ParseError::InvalidConfig("namespace must not be blank".into()));
        }
        if c.limits.allowed_extensions.is_empty() {
            return Err(ParseError::InvalidConfig(
                "at least one allowed source extension is required".into(),
            ));
        }

        match c.backend {
            BackendKind::DocParser => {
                if c.docparser.base_url.trim().is_empty() {
                    return Err(ParseError::InvalidConfig(
                        "docparser backend selected but no base URL configured".into(),
                    ));
                }
                if c.docparser.layout_step_size == 0 {
                    return Err(ParseError::InvalidConfig(
                        "layout_step_size must be ≥ 1".into(),
                    ));
                }
            }
            BackendKind::MinerU => {
                if c.mineru.base_url.trim().is_empty() {
                    return Err(ParseError::InvalidConfig(
                        "mineru backend selected but no base URL configured".into(),
                    ));
                }
                if c.mineru.api_token.as_deref().is_none_or(str::is_empty) {
                    return Err(ParseError::InvalidConfig(
                        "mineru backend selected but no API token configured".into(),
                    ));
                }
            }
        }

        match c.storage {
            StorageKind::Bucket => {
                if c.bucket.endpoint.trim().is_empty() || c.bucket.bucket.trim().is_empty() {
                    return Err(ParseError::InvalidConfig(
                        "bucket store selected but endpoint or bucket name missing".into(),
                    ));
                }
            }
            StorageKind::ContentApi => {
                let repo = c.content_api.repo.trim();
                if repo.is_empty() || !repo.contains('/') {
                    return Err(ParseError::InvalidConfig(format!(
                        "content-api store needs a repository as owner/name, got '{repo}'"
                    )));
                }
                if c.content_api.token.as_deref().is_none_or(str::is_empty) {
                    return Err(ParseError::InvalidConfig(
                        "content-api store selected but no token configured".into(),
                    ));
                }
            }
        }

        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Conversion backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Paginated layout-result service; images are remote URLs.
    #[default]
    DocParser,
    /// Archive-result service; images are files inside the archive.
    MinerU,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::DocParser => "docparser",
            BackendKind::MinerU => "mineru",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MediaStore selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    /// Flat key-value object storage.
    #[default]
    Bucket,
    /// Version-controlled content host fronted by a CDN.
    ContentApi,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Bucket => "bucket",
            StorageKind::ContentApi => "content-api",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_ready() -> PipelineConfigBuilder {
        PipelineConfig::builder()
            .docparser_url("http://parser.local")
            .bucket_endpoint("http://objects.local")
            .bucket_name("imgs")
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.polling.interval_ms, 3000);
        assert_eq!(c.polling.max_attempts, 200);
        assert_eq!(c.docparser.layout_step_size, 1000);
        assert_eq!(c.docparser.enhancement_mode, "VLM");
        assert_eq!(c.mineru.model_version, "vlm");
        assert_eq!(c.content_api.path_prefix, "images/");
        assert_eq!(c.limits.max_size_bytes(), 50 * 1024 * 1024);
        assert_eq!(c.backend, BackendKind::DocParser);
        assert_eq!(c.storage, StorageKind::Bucket);
        assert!(c.fail_on_storage_outage);
    }

    #[test]
    fn setters_clamp() {
        let c = bucket_ready()
            .max_poll_attempts(0)
            .image_concurrency(0)
            .layout_step_size(0)
            .build()
            .unwrap();
        assert_eq!(c.polling.max_attempts, 1);
        assert_eq!(c.image_concurrency, 1);
        assert_eq!(c.docparser.layout_step_size, 1);
    }

    #[test]
    fn build_requires_selected_backend_settings() {
        let err = PipelineConfig::builder()
            .bucket_endpoint("http://objects.local")
            .bucket_name("imgs")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("docparser"), "got: {err}");

        let err = bucket_ready()
            .backend(BackendKind::MinerU)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("API token"), "got: {err}");
    }

    #[test]
    fn build_requires_selected_store_settings() {
        let err = PipelineConfig::builder()
            .docparser_url("http://parser.local")
            .storage(StorageKind::ContentApi)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("owner/name"), "got: {err}");
    }

    #[test]
    fn debug_redacts_tokens() {
        let c = bucket_ready()
            .docparser_token("super-secret-1")
            .mineru_token("super-secret-2")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("super-secret"), "leaked: {dbg}");
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn kinds_serialise_with_cli_names() {
        assert_eq!(
            serde_json::to_string(&StorageKind::ContentApi).unwrap(),
            "\"content-api\""
        );
        assert_eq!(serde_json::to_string(&BackendKind::MinerU).unwrap(), "\"mineru\"");
        assert_eq!(BackendKind::DocParser.to_string(), "docparser");
    }
}
