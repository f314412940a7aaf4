//! Error types for the docparse-relay library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`ParseError`] - **Fatal**: the document cannot be converted at all
//!   (rejected upload, backend failure, polling timeout, unreadable result).
//!   Returned as `Err(ParseError)` from [`crate::convert::Pipeline::convert`].
//!
//! * [`ImageError`] - **Non-fatal**: one embedded image could not be
//!   downloaded, read, or re-hosted. The original reference stays in the
//!   Markdown and the error is recorded in
//!   [`crate::output::ConversionOutput::image_failures`].
//!
//! * [`StoreError`] - a single MediaStore call failed. The rewriter turns it
//!   into an [`ImageError::Upload`]; it only becomes fatal (as
//!   [`ParseError::Storage`]) when every upload of a document failed.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docparse-relay library.
///
/// Image-level failures use [`ImageError`] and are stored in the output
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum ParseError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded document has no bytes.
    #[error("Source document '{file_name}' is empty")]
    EmptySource { file_name: String },

    /// The file name is blank or has no extension.
    #[error("Invalid source file name '{file_name}': a name with an extension is required")]
    InvalidFileName { file_name: String },

    /// The extension is not on the allow-list.
    #[error("Unsupported file type '.{extension}'. Allowed: {allowed}")]
    UnsupportedFileType { extension: String, allowed: String },

    /// The document exceeds the configured size limit.
    #[error("Source document is {size} bytes, above the {max_mb} MB limit")]
    SourceTooLarge { size: u64, max_mb: u64 },

    // ── Job lifecycle errors ──────────────────────────────────────────────
    /// The backend refused the conversion request or returned no job id.
    #[error("Backend '{backend}' rejected the submission: {message}")]
    Submission { backend: String, message: String },

    /// The backend reported the job as failed while polling.
    #[error("Backend '{backend}' reported job {job_id} as failed after {attempts} polls: {message}")]
    ConversionFailed {
        backend: String,
        job_id: String,
        attempts: u32,
        message: String,
    },

    /// Polling hit `max_attempts` without a terminal status.
    #[error("Job {job_id} on backend '{backend}' did not finish after {attempts} polls.\nResubmit the document or raise --max-poll-attempts.")]
    ConversionTimeout {
        backend: String,
        job_id: String,
        attempts: u32,
    },

    /// The job succeeded but its result could not be retrieved.
    #[error("Fetching the result of job {job_id} from '{backend}' failed: {reason}")]
    Fetch {
        backend: String,
        job_id: String,
        reason: String,
    },

    /// The result archive was extracted but holds no Markdown file.
    #[error("Job {job_id}: no Markdown file in extracted result '{}'", dir.display())]
    MissingOutput { job_id: String, dir: PathBuf },

    // ── Media errors ──────────────────────────────────────────────────────
    /// Every attempted image upload failed; the store looks unreachable.
    #[error("Media store '{store}' failed for all {attempted} image uploads. First error: {first_error}")]
    Storage {
        store: String,
        attempted: usize,
        first_error: String,
    },

    /// A relative image path was found but the backend supplied no media root.
    #[error("Image target '{target}' is a local path, but the conversion produced no media root")]
    MissingMediaRoot { target: String },

    // ── Transport errors ──────────────────────────────────────────────────
    /// A request to a backend failed at the network level; the caller may retry.
    #[error("{operation} failed: {detail}")]
    Network {
        operation: String,
        detail: String,
        timed_out: bool,
    },

    /// The caller cancelled the run (explicitly or via its deadline).
    #[error("Conversion cancelled{}", job_id.as_deref().map(|id| format!(" while handling job {id}")).unwrap_or_default())]
    Cancelled { job_id: Option<String> },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Scratch-directory I/O failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParseError {
    /// Whether retrying the whole conversion later might succeed.
    ///
    /// Network failures and polling timeouts are transient; rejected input,
    /// explicit backend failures, and bad configuration are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ParseError::Network { .. } | ParseError::ConversionTimeout { .. }
        )
    }

    /// Wrap a `reqwest` error raised while performing `operation`.
    pub(crate) fn network(operation: impl Into<String>, err: reqwest::Error) -> Self {
        ParseError::Network {
            operation: operation.into(),
            timed_out: err.is_timeout(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ParseError::Io {
            context: context.into(),
            source,
        }
    }
}

/// A non-fatal error for a single image target.
///
/// Stored in [`crate::output::ConversionOutput::image_failures`]. The
/// target's occurrences are left untouched in the final Markdown.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ImageError {
    /// HTTP download of a remote image failed.
    #[error("Image '{target}': download failed: {detail}")]
    Download { target: String, detail: String },

    /// A relative image path does not exist inside the media root.
    #[error("Image '{target}': file not found at '{}'", path.display())]
    MissingFile { target: String, path: PathBuf },

    /// A relative image path resolves outside the media root.
    #[error("Image '{target}': path escapes the media root")]
    OutsideMediaRoot { target: String },

    /// The local file exists but could not be read.
    #[error("Image '{target}': read failed: {detail}")]
    Read { target: String, detail: String },

    /// The media store rejected or failed the upload.
    #[error("Image '{target}': upload failed: {detail}")]
    Upload { target: String, detail: String },
}

impl ImageError {
    /// The original reference string this error refers to.
    pub fn target(&self) -> &str {
        match self {
            ImageError::Download { target, .. }
            | ImageError::MissingFile { target, .. }
            | ImageError::OutsideMediaRoot { target }
            | ImageError::Read { target, .. }
            | ImageError::Upload { target, .. } => target,
        }
    }

    /// True when the store itself failed, as opposed to the image source.
    pub fn is_upload_failure(&self) -> bool {
        matches!(self, ImageError::Upload { .. })
    }
}

/// Failure of one MediaStore call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store answered with a non-success HTTP status.
    #[error("HTTP {status} from {operation}: {body}")]
    Http {
        operation: String,
        status: u16,
        body: String,
    },

    /// The request never completed.
    #[error("{operation} failed: {detail}")]
    Network { operation: String, detail: String },

    /// The store answered, but not in the expected shape.
    #[error("{operation}: unexpected response: {detail}")]
    Rejected { operation: String, detail: String },
}

impl StoreError {
    pub(crate) fn network(operation: impl Into<String>, err: reqwest::Error) -> Self {
        StoreError::Network {
            operation: operation.into(),
            detail: err.to_string(),
        }
    }
}
