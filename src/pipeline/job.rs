//! Submit / poll / fetch lifecycle shared by every conversion backend.
//!
//! ```text
//! Submitted ──accepted──▶ Polling ──running──▶ Polling   (attempts += 1)
//!                            │
//!                            ├──success──────▶ Succeeded ──▶ fetch (once)
//!                            ├──failed───────▶ Failed
//!                            └──attempts == max──▶ TimedOut
//! ```
//!
//! The attempt counter is local to each [`ConversionJob`]. Waiting between
//! polls goes through a [`Pacer`], so tests drive the machine with zero real
//! delay, and every backend call races the run's [`CancellationToken`].

use crate::backend::{RawConversion, SourceDocument};
use crate::config::{BackendKind, PollingConfig};
use crate::error::ParseError;
use crate::progress::PipelineProgressCallback;
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── Job model ────────────────────────────────────────────────────────────

/// Lifecycle state of a [`ConversionJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum JobState {
    Submitted,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::TimedOut)
    }
}

/// What one status poll reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Still converting. `detail` is free-form progress text, if any.
    Running { detail: Option<String> },
    /// Finished. Some backends hand back where the result lives.
    Succeeded { result_locator: Option<String> },
    /// The backend gave up on the document.
    Failed { message: String },
}

/// One in-flight conversion.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    job_id: String,
    backend: BackendKind,
    state: JobState,
    attempts: u32,
    max_attempts: u32,
    result_locator: Option<String>,
}

impl ConversionJob {
    fn submitted(job_id: String, backend: BackendKind, max_attempts: u32) -> Self {
        Self {
            job_id,
            backend,
            state: JobState::Submitted,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            result_locator: None,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Status polls issued so far. Never exceeds `max_attempts`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Result location reported together with the success status.
    pub fn result_locator(&self) -> Option<&str> {
        self.result_locator.as_deref()
    }
}

// ── Backend contract ─────────────────────────────────────────────────────

/// The capability set every conversion backend provides.
pub trait ConversionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Hand the document to the service and return its job id.
    fn submit(
        &self,
        source: &SourceDocument,
    ) -> impl Future<Output = Result<String, ParseError>> + Send;

    /// Ask for the current status of `job_id`.
    fn poll(&self, job_id: &str) -> impl Future<Output = Result<JobStatus, ParseError>> + Send;

    /// Retrieve the Markdown of a succeeded job.
    ///
    /// `run_dir` is the run's private scratch directory; anything written
    /// there is removed by the orchestrator.
    fn fetch(
        &self,
        job: &ConversionJob,
        run_dir: &Path,
    ) -> impl Future<Output = Result<RawConversion, ParseError>> + Send;
}

// ── Pacing ───────────────────────────────────────────────────────────────

/// Waits between two polls.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, interval: Duration);
}

/// Sleeps on the tokio timer.
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

/// Does not wait at all. For tests and replay tooling.
pub struct ImmediatePacer;

#[async_trait]
impl Pacer for ImmediatePacer {
    async fn pause(&self, _interval: Duration) {
        tokio::task::yield_now().await;
    }
}

// ── Driver ───────────────────────────────────────────────────────────────

/// Drives one backend through submit, poll and fetch.
pub struct JobRunner<'a, B: ConversionBackend> {
    backend: &'a B,
    polling: PollingConfig,
    pacer: &'a dyn Pacer,
    cancel: CancellationToken,
    progress: &'a dyn PipelineProgressCallback,
}

impl<'a, B: ConversionBackend> JobRunner<'a, B> {
    pub fn new(
        backend: &'a B,
        polling: PollingConfig,
        pacer: &'a dyn Pacer,
        cancel: CancellationToken,
        progress: &'a dyn PipelineProgressCallback,
    ) -> Self {
        Self {
            backend,
            polling,
            pacer,
            cancel,
            progress,
        }
    }

    /// Submit, wait for a terminal status, then fetch exactly once.
    pub async fn run(
        &self,
        source: &SourceDocument,
        run_dir: &Path,
    ) -> Result<(ConversionJob, RawConversion), ParseError> {
        let mut job = self.submit(source).await?;
        self.wait(&mut job).await?;
        let raw = self.fetch(&job, run_dir).await?;
        Ok((job, raw))
    }

    /// Submit the document; the returned job is in [`JobState::Submitted`].
    pub async fn submit(&self, source: &SourceDocument) -> Result<ConversionJob, ParseError> {
        let kind = self.backend.kind();
        let job_id = self.guard(None, self.backend.submit(source)).await?;
        if job_id.trim().is_empty() {
            return Err(ParseError::Submission {
                backend: kind.to_string(),
                message: "response carried no job id".into(),
            });
        }

        info!("Submitted '{}' to {} as job {}", source.file_name, kind, job_id);
        self.progress.on_submitted(kind.as_str(), &job_id);
        Ok(ConversionJob::submitted(
            job_id,
            kind,
            self.polling.max_attempts,
        ))
    }

    /// Poll until the job reaches a terminal state.
    ///
    /// Sleeps `interval_ms` between polls, never before the first one and
    /// never after a terminal status.
    pub async fn wait(&self, job: &mut ConversionJob) -> Result<(), ParseError> {
        if job.state.is_terminal() {
            return Err(ParseError::Internal(format!(
                "job {} is already {:?}",
                job.job_id, job.state
            )));
        }
        job.state = JobState::Polling;
        let interval = Duration::from_millis(self.polling.interval_ms);

        loop {
            if job.attempts > 0 {
                self.guard(Some(&job.job_id), async {
                    self.pacer.pause(interval).await;
                    Ok(())
                })
                .await?;
            }

            let status = self
                .guard(Some(&job.job_id), self.backend.poll(&job.job_id))
                .await?;
            job.attempts += 1;

            match status {
                JobStatus::Running { detail } => {
                    debug!(
                        "Job {} running (poll {}/{}){}",
                        job.job_id,
                        job.attempts,
                        job.max_attempts,
                        detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
                    );
                    self.progress.on_poll(
                        &job.job_id,
                        job.attempts,
                        job.max_attempts,
                        detail.as_deref(),
                    );
                    if job.attempts >= job.max_attempts {
                        job.state = JobState::TimedOut;
                        warn!(
                            "Job {} still running after {} polls, giving up",
                            job.job_id, job.attempts
                        );
                        return Err(ParseError::ConversionTimeout {
                            backend: job.backend.to_string(),
                            job_id: job.job_id.clone(),
                            attempts: job.attempts,
                        });
                    }
                }
                JobStatus::Succeeded { result_locator } => {
                    self.progress
                        .on_poll(&job.job_id, job.attempts, job.max_attempts, None);
                    job.state = JobState::Succeeded;
                    job.result_locator = result_locator;
                    info!("Job {} succeeded after {} poll(s)", job.job_id, job.attempts);
                    return Ok(());
                }
                JobStatus::Failed { message } => {
                    self.progress
                        .on_poll(&job.job_id, job.attempts, job.max_attempts, None);
                    job.state = JobState::Failed;
                    warn!("Job {} failed: {}", job.job_id, message);
                    return Err(ParseError::ConversionFailed {
                        backend: job.backend.to_string(),
                        job_id: job.job_id.clone(),
                        attempts: job.attempts,
                        message,
                    });
                }
            }
        }
    }

    /// Retrieve the result of a succeeded job.
    pub async fn fetch(
        &self,
        job: &ConversionJob,
        run_dir: &Path,
    ) -> Result<RawConversion, ParseError> {
        if job.state != JobState::Succeeded {
            return Err(ParseError::Internal(format!(
                "fetch called for job {} in state {:?}",
                job.job_id, job.state
            )));
        }
        let raw = self
            .guard(Some(&job.job_id), self.backend.fetch(job, run_dir))
            .await?;
        info!(
            "Fetched {} bytes of Markdown for job {}",
            raw.markdown.len(),
            job.job_id
        );
        Ok(raw)
    }

    async fn guard<T>(
        &self,
        job_id: Option<&str>,
        fut: impl Future<Output = Result<T, ParseError>>,
    ) -> Result<T, ParseError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ParseError::Cancelled {
                job_id: job_id.map(str::to_string),
            }),
            result = fut => result,
        }
    }
}
