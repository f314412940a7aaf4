//! Pipeline orchestrator: one document in, self-contained Markdown out.
//!
//! ```text
//! validate ──▶ scratch dir ──▶ submit ──▶ poll … ──▶ fetch ──▶ rewrite images ──▶ output
//!                  │                                                              │
//!                  └──────────────── removed on success and on failure ───────────┘
//! ```
//!
//! Every run gets its own directory under `scratch_dir`, so concurrent runs
//! never share files. The directory is a [`tempfile::TempDir`]: it is
//! removed explicitly at the end of a run and by `Drop` if the run future
//! is abandoned.

use crate::backend::{Converter, SourceDocument};
use crate::config::PipelineConfig;
use crate::error::ParseError;
use crate::http::build_client;
use crate::output::ConversionOutput;
use crate::pipeline::input::{sanitize_document_id, scratch_file_name, validate_source};
use crate::pipeline::job::{ConversionBackend, JobRunner, Pacer, TokioPacer};
use crate::pipeline::rewrite::{distinct_targets, scan_images, MediaRewriter};
use crate::progress::{NoopProgressCallback, PipelineProgressCallback};
use crate::store::{build_store, MediaStore};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A configured conversion pipeline.
///
/// Cheap to share behind an `Arc`; each call to [`Pipeline::convert`] owns
/// its own scratch directory and job.
pub struct Pipeline {
    config: PipelineConfig,
    client: reqwest::Client,
    converter: Converter,
    store: Arc<dyn MediaStore>,
    pacer: Arc<dyn Pacer>,
}

impl Pipeline {
    /// Build the HTTP client, backend and store selected by `config`.
    pub fn new(config: PipelineConfig) -> Result<Self, ParseError> {
        let client = build_client(&config.http)?;
        let converter = Converter::from_config(&config, client.clone());
        let store = build_store(&config, client.clone());
        Ok(Self {
            config,
            client,
            converter,
            store,
            pacer: Arc::new(TokioPacer),
        })
    }

    /// Replace the MediaStore.
    pub fn with_store(mut self, store: Arc<dyn MediaStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the poll pacer.
    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Convert one document, scoping its images by its sanitised file name.
    pub async fn convert(&self, source: SourceDocument) -> Result<ConversionOutput, ParseError> {
        self.convert_with_cancel(source, CancellationToken::new()).await
    }

    /// Like [`Pipeline::convert`], aborting as soon as `cancel` fires.
    pub async fn convert_with_cancel(
        &self,
        source: SourceDocument,
        cancel: CancellationToken,
    ) -> Result<ConversionOutput, ParseError> {
        let scope = sanitize_document_id(&source.file_name);
        self.convert_scoped(source, &scope, cancel).await
    }

    /// Convert one document, storing its images under `scope`.
    pub async fn convert_scoped(
        &self,
        source: SourceDocument,
        scope: &str,
        cancel: CancellationToken,
    ) -> Result<ConversionOutput, ParseError> {
        let start = Instant::now();
        let ext = validate_source(&source.bytes, &source.file_name, &self.config.limits)?;
        info!(
            "Converting '{}' ({} bytes) via {} into {} store",
            source.file_name,
            source.bytes.len(),
            self.converter.kind(),
            self.store.name()
        );

        // Deadline cancels a child token so callers keep their own token intact.
        let run_cancel = cancel.child_token();
        let deadline = self.config.deadline_secs.map(|secs| {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                warn!("Deadline of {}s reached, cancelling run", secs);
                token.cancel();
            })
        });

        let run_dir = self.create_run_dir().await?;
        let result = self
            .run(&source, &ext, scope, run_dir.path(), &run_cancel, start)
            .await;

        if let Some(timer) = deadline {
            timer.abort();
        }
        let run_path = run_dir.path().to_path_buf();
        match run_dir.close() {
            Ok(()) => debug!("Removed scratch dir {}", run_path.display()),
            Err(e) => warn!("Failed to remove scratch dir {}: {}", run_path.display(), e),
        }
        result
    }

    /// Delete every stored image under `namespace`/`scope`.
    ///
    /// Best-effort: returns how many objects were removed and never fails.
    pub async fn purge_images(&self, namespace: &str, scope: &str) -> usize {
        let removed = self.store.delete_scope(namespace, scope).await;
        info!(
            "Purged {} image(s) from {}/{} in {} store",
            removed,
            namespace,
            scope,
            self.store.name()
        );
        removed
    }

    async fn create_run_dir(&self) -> Result<TempDir, ParseError> {
        let parent = &self.config.scratch_dir;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ParseError::io(format!("create scratch dir {}", parent.display()), e))?;
        tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(parent)
            .map_err(|e| ParseError::io(format!("create run dir in {}", parent.display()), e))
    }

    fn progress(&self) -> &dyn PipelineProgressCallback {
        match &self.config.progress_callback {
            Some(cb) => cb.as_ref(),
            None => &NoopProgressCallback,
        }
    }

    async fn run(
        &self,
        source: &SourceDocument,
        ext: &str,
        scope: &str,
        run_dir: &Path,
        cancel: &CancellationToken,
        start: Instant,
    ) -> Result<ConversionOutput, ParseError> {
        let progress = self.progress();

        // ── Step 1: Stage the source in the run directory ────────────────
        let document_id = sanitize_document_id(&source.file_name);
        let staged = run_dir.join(scratch_file_name(&document_id, ext, chrono::Local::now()));
        tokio::fs::write(&staged, &source.bytes)
            .await
            .map_err(|e| ParseError::io(format!("stage source at {}", staged.display()), e))?;
        debug!("Staged source at {}", staged.display());

        // ── Step 2: Submit, poll, fetch ──────────────────────────────────
        let runner = JobRunner::new(
            &self.converter,
            self.config.polling.clone(),
            self.pacer.as_ref(),
            cancel.clone(),
            progress,
        );
        let (job, raw) = runner.run(source, run_dir).await?;

        let refs = scan_images(&raw.markdown);
        progress.on_fetched(job.job_id(), raw.markdown.len(), distinct_targets(&refs).len());

        // ── Step 3: Relocate images ──────────────────────────────────────
        let rewriter = MediaRewriter {
            store: self.store.as_ref(),
            client: &self.client,
            namespace: &self.config.namespace,
            scope,
            image_concurrency: self.config.image_concurrency,
            temporary_image_hosts: &self.config.temporary_image_hosts,
            fail_on_storage_outage: self.config.fail_on_storage_outage,
            progress,
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ParseError::Cancelled {
                job_id: Some(job.job_id().to_string()),
            }),
            outcome = rewriter.rewrite(&raw.markdown, raw.media_root.as_deref()) => outcome,
        }?;

        // ── Step 4: Assemble output ──────────────────────────────────────
        let processing_time_ms = start.elapsed().as_millis() as u64;
        progress.on_complete(outcome.images.len(), outcome.failures.len(), processing_time_ms);
        info!(
            "Converted '{}' in {}ms: {} image(s) relocated, {} left unchanged",
            source.file_name,
            processing_time_ms,
            outcome.images.len(),
            outcome.failures.len()
        );

        Ok(ConversionOutput {
            markdown: outcome.markdown,
            image_count: outcome.images.len(),
            images: outcome.images,
            image_failures: outcome.failures,
            processing_time_ms,
            job_id: job.job_id().to_string(),
            backend: job.backend(),
            storage: self.config.storage,
            namespace: self.config.namespace.clone(),
            document_id: scope.to_string(),
            poll_attempts: job.attempts(),
        })
    }
}

/// Convert one document with a fresh [`Pipeline`].
///
/// Convenient for one-off calls; build a [`Pipeline`] once to reuse its
/// HTTP connection pool across documents.
pub async fn convert(
    source: SourceDocument,
    config: &PipelineConfig,
) -> Result<ConversionOutput, ParseError> {
    Pipeline::new(config.clone())?.convert(source).await
}

/// Write Markdown to `path` atomically (temp file + rename).
pub async fn write_markdown(path: &Path, markdown: &str) -> Result<(), ParseError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ParseError::io(format!("create {}", parent.display()), e))?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, markdown)
        .await
        .map_err(|e| ParseError::io(format!("write {}", tmp_path.display()), e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| ParseError::io(format!("rename to {}", path.display()), e))
}
