//! CLI binary for docparse-relay.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use docparse_relay::config::{BucketStoreConfig, ContentApiConfig};
use docparse_relay::http::build_client;
use docparse_relay::pipeline::input::{load_source, sanitize_document_id};
use docparse_relay::{
    write_markdown, BackendKind, Pipeline, PipelineConfig, PipelineProgressCallback,
    ProgressCallback, StorageKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the job runs, then a bar over the image targets.
struct CliProgressCallback {
    bar: ProgressBar,
    failed: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Uploading");
        bar.set_message("sending document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failed: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Relocating");
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_submitted(&self, backend: &str, job_id: &str) {
        self.bar.set_prefix("Converting");
        self.bar.println(format!(
            "{} {} job {}",
            cyan("◆"),
            bold(backend),
            dim(job_id)
        ));
    }

    fn on_poll(&self, _job_id: &str, attempt: u32, max_attempts: u32, detail: Option<&str>) {
        let detail = detail.map(|d| format!("  {d}")).unwrap_or_default();
        self.bar
            .set_message(format!("poll {attempt}/{max_attempts}{detail}"));
    }

    fn on_fetched(&self, _job_id: &str, markdown_len: usize, image_targets: usize) {
        self.bar.println(format!(
            "  {} Markdown fetched  {}",
            green("✓"),
            dim(&format!("{markdown_len} bytes, {image_targets} image(s)"))
        ));
        self.activate_bar(image_targets);
    }

    fn on_image_resolved(&self, _target: &str, _url: &str) {
        self.bar.inc(1);
    }

    fn on_image_failed(&self, target: &str, error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), target, red(&msg)));
        self.bar.inc(1);
    }

    fn on_complete(&self, image_count: usize, failed_images: usize, elapsed_ms: u64) {
        self.bar.finish_and_clear();
        if failed_images == 0 {
            eprintln!(
                "{} {} image(s) relocated  {}",
                green("✔"),
                bold(&image_count.to_string()),
                dim(&format!("{elapsed_ms}ms"))
            );
        } else {
            eprintln!(
                "{} {} image(s) relocated, {} left unchanged  {}",
                cyan("⚠"),
                bold(&image_count.to_string()),
                red(&failed_images.to_string()),
                dim(&format!("{elapsed_ms}ms"))
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Layout backend, bucket store (stdout)
  docparse report.pdf --docparser-url https://parser.internal/api \
      --bucket-endpoint https://objects.internal --bucket-name kb-images

  # Archive backend, repository store, write to file
  docparse --backend mineru --storage content-api --github-repo acme/kb-assets \
      memo.docx -o memo.md

  # Convert from URL with a five minute deadline
  docparse https://example.com/paper.pdf --deadline 300 -o paper.md

  # JSON output with image list and timings
  docparse --json report.pdf > report.json

  # Remove every stored image of one document
  docparse --purge --namespace kb-42 --scope Annual_Report

ENVIRONMENT VARIABLES:
  DOCPARSE_BACKEND        docparser | mineru
  DOCPARSE_STORAGE        bucket | content-api
  DOCPARSE_URL            Layout backend base URL
  DOCPARSE_TOKEN          Layout backend bearer token
  MINERU_BASE_URL         Archive backend base URL
  MINERU_API_TOKEN        Archive backend bearer token
  BUCKET_ENDPOINT         Object store endpoint
  BUCKET_NAME             Object store bucket
  BUCKET_TOKEN            Object store bearer token
  BUCKET_PUBLIC_URL       Public URL prefix for stored objects
  GITHUB_TOKEN            Repository contents API token
  GITHUB_REPO             Repository as owner/name
  GITHUB_BRANCH           Repository branch (default: main)
  RUST_LOG                Override log filter
"#;

/// Convert documents to Markdown and re-host their images.
#[derive(Parser, Debug)]
#[command(
    name = "docparse",
    version,
    about = "Convert PDF/Word documents to Markdown with permanently hosted images",
    long_about = "Send a PDF or Word document to a document-understanding backend, wait for the \
conversion, then copy every image it produced into a content-addressed store and rewrite the \
Markdown to point at the permanent URLs.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file path or HTTP/HTTPS URL.
    input: Option<String>,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "DOCPARSE_OUTPUT")]
    output: Option<PathBuf>,

    /// Conversion backend.
    #[arg(long, env = "DOCPARSE_BACKEND", value_enum, default_value = "docparser")]
    backend: BackendArg,

    /// Image store.
    #[arg(long, env = "DOCPARSE_STORAGE", value_enum, default_value = "bucket")]
    storage: StorageArg,

    /// Tenant namespace for stored images.
    #[arg(long, env = "DOCPARSE_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Image scope; defaults to the sanitised input file name.
    #[arg(long)]
    scope: Option<String>,

    /// Delete every stored image under --namespace/--scope and exit.
    #[arg(long)]
    purge: bool,

    #[arg(long, env = "DOCPARSE_URL", default_value = "")]
    docparser_url: String,

    #[arg(long, env = "DOCPARSE_TOKEN", hide_env_values = true)]
    docparser_token: Option<String>,

    #[arg(long, env = "MINERU_BASE_URL")]
    mineru_url: Option<String>,

    #[arg(long, env = "MINERU_API_TOKEN", hide_env_values = true)]
    mineru_token: Option<String>,

    #[arg(long, env = "BUCKET_ENDPOINT", default_value = "")]
    bucket_endpoint: String,

    #[arg(long, env = "BUCKET_NAME", default_value = "")]
    bucket_name: String,

    #[arg(long, env = "BUCKET_TOKEN", hide_env_values = true)]
    bucket_token: Option<String>,

    #[arg(long, env = "BUCKET_PUBLIC_URL")]
    bucket_public_url: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Repository for the content-api store, as owner/name.
    #[arg(long, env = "GITHUB_REPO", default_value = "")]
    github_repo: String,

    #[arg(long, env = "GITHUB_BRANCH", default_value = "main")]
    github_branch: String,

    /// Only relocate remote images on these host suffixes (repeatable).
    #[arg(long = "temporary-host")]
    temporary_hosts: Vec<String>,

    /// Concurrent image downloads/uploads.
    #[arg(long, env = "DOCPARSE_IMAGE_CONCURRENCY", default_value_t = 4)]
    image_concurrency: usize,

    /// Milliseconds between status polls.
    #[arg(long, env = "DOCPARSE_POLL_INTERVAL_MS", default_value_t = 3000)]
    poll_interval_ms: u64,

    /// Status polls before giving up.
    #[arg(long, env = "DOCPARSE_MAX_POLLS", default_value_t = 200)]
    max_polls: u32,

    /// Abort the whole run after this many seconds.
    #[arg(long, env = "DOCPARSE_DEADLINE")]
    deadline: Option<u64>,

    /// Keep original links instead of failing when every upload fails.
    #[arg(long)]
    tolerate_storage_outage: bool,

    /// Output structured JSON (ConversionOutput) instead of Markdown.
    #[arg(long, env = "DOCPARSE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCPARSE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCPARSE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCPARSE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Docparser,
    Mineru,
}

impl From<BackendArg> for BackendKind {
    fn from(v: BackendArg) -> Self {
        match v {
            BackendArg::Docparser => BackendKind::DocParser,
            BackendArg::Mineru => BackendKind::MinerU,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StorageArg {
    Bucket,
    ContentApi,
}

impl From<StorageArg> for StorageKind {
    fn from(v: StorageArg) -> Self {
        match v {
            StorageArg::Bucket => StorageKind::Bucket,
            StorageArg::ContentApi => StorageKind::ContentApi,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose asks for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.purge;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let pipeline = Pipeline::new(config).context("Failed to initialise pipeline")?;

    // ── Purge mode ───────────────────────────────────────────────────────
    if cli.purge {
        let scope = match (&cli.scope, &cli.input) {
            (Some(scope), _) => scope.clone(),
            (None, Some(input)) => sanitize_document_id(input_file_name(input)),
            (None, None) => anyhow::bail!("--purge needs --scope or an input name"),
        };
        let removed = pipeline.purge_images(&cli.namespace, &scope).await;
        if cli.json {
            println!(
                "{}",
                serde_json::json!({ "namespace": cli.namespace, "scope": scope, "deleted": removed })
            );
        } else if !cli.quiet {
            eprintln!(
                "{} removed {} image(s) from {}/{}",
                green("✔"),
                bold(&removed.to_string()),
                cli.namespace,
                scope
            );
        }
        return Ok(());
    }

    let input = cli
        .input
        .as_deref()
        .context("An input file or URL is required")?;

    // ── Load source ──────────────────────────────────────────────────────
    let client = build_client(&pipeline.config().http).context("Failed to build HTTP client")?;
    let source = load_source(input, &client)
        .await
        .with_context(|| format!("Failed to load {input}"))?;

    // ── Run conversion (Ctrl-C cancels) ──────────────────────────────────
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let scope = cli
        .scope
        .clone()
        .unwrap_or_else(|| sanitize_document_id(&source.file_name));
    let output = pipeline
        .convert_scoped(source, &scope, cancel)
        .await
        .context("Conversion failed")?;

    // ── Emit result ──────────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        write_markdown(output_path, &output.markdown)
            .await
            .context("Failed to write output")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} image(s)  {}ms  →  {}",
                if output.image_failures.is_empty() {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                output.image_count,
                output.processing_time_ms,
                bold(&output_path.display().to_string()),
            );
        }
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if cli.output.is_none() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.markdown.as_bytes())
            .context("Failed to write to stdout")?;
        if !output.markdown.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet && !show_progress && !cli.json {
        eprintln!(
            "Converted job {} in {}ms: {} image(s), {} unchanged",
            output.job_id,
            output.processing_time_ms,
            output.image_count,
            output.image_failures.len()
        );
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .backend(cli.backend.into())
        .storage(cli.storage.into())
        .namespace(&cli.namespace)
        .image_concurrency(cli.image_concurrency)
        .poll_interval_ms(cli.poll_interval_ms)
        .max_poll_attempts(cli.max_polls)
        .fail_on_storage_outage(!cli.tolerate_storage_outage)
        .docparser_url(&cli.docparser_url)
        .bucket(BucketStoreConfig {
            endpoint: cli.bucket_endpoint.clone(),
            bucket: cli.bucket_name.clone(),
            access_token: cli.bucket_token.clone(),
            public_url: cli.bucket_public_url.clone(),
        })
        .content_api(ContentApiConfig {
            token: cli.github_token.clone(),
            repo: cli.github_repo.clone(),
            branch: cli.github_branch.clone(),
            ..ContentApiConfig::default()
        });

    if let Some(ref token) = cli.docparser_token {
        builder = builder.docparser_token(token);
    }
    if let Some(ref url) = cli.mineru_url {
        builder = builder.mineru_url(url);
    }
    if let Some(ref token) = cli.mineru_token {
        builder = builder.mineru_token(token);
    }
    if let Some(secs) = cli.deadline {
        builder = builder.deadline_secs(secs);
    }
    for host in &cli.temporary_hosts {
        builder = builder.temporary_image_host(host);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// File-name part of a path or URL.
fn input_file_name(input: &str) -> &str {
    let trimmed = input.split(['?', '#']).next().unwrap_or(input);
    trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
}
