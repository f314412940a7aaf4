//! Conversion backends.
//!
//! Two services with different result shapes sit behind one contract,
//! [`ConversionBackend`](crate::pipeline::job::ConversionBackend):
//!
//! | Backend | Result | Images |
//! |---|---|---|
//! | [`DocParserBackend`] | paginated layout blocks | remote URLs on the vendor's storage |
//! | [`MinerUBackend`] | zip archive | files next to the Markdown |
//!
//! The orchestrator picks one through [`Converter`], a plain enum chosen by
//! [`BackendKind`].

pub mod docparser;
pub mod mineru;

pub use docparser::DocParserBackend;
pub use mineru::MinerUBackend;

use crate::config::{BackendKind, PipelineConfig};
use crate::error::ParseError;
use crate::pipeline::job::{ConversionBackend, ConversionJob, JobStatus};
use std::path::{Path, PathBuf};

/// The document handed to a backend.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

/// What every backend returns after a successful fetch.
#[derive(Debug, Clone)]
pub struct RawConversion {
    /// Markdown with image references not yet relocated.
    pub markdown: String,
    /// Directory that relative image paths resolve against.
    ///
    /// Set only by backends whose images are local files.
    pub media_root: Option<PathBuf>,
}

/// Backend selected for a run.
pub enum Converter {
    DocParser(DocParserBackend),
    MinerU(MinerUBackend),
}

impl Converter {
    pub fn from_config(config: &PipelineConfig, client: reqwest::Client) -> Self {
        match config.backend {
            BackendKind::DocParser => {
                Converter::DocParser(DocParserBackend::new(client, config.docparser.clone()))
            }
            BackendKind::MinerU => {
                Converter::MinerU(MinerUBackend::new(client, config.mineru.clone()))
            }
        }
    }
}

impl ConversionBackend for Converter {
    fn kind(&self) -> BackendKind {
        match self {
            Converter::DocParser(b) => b.kind(),
            Converter::MinerU(b) => b.kind(),
        }
    }

    async fn submit(&self, source: &SourceDocument) -> Result<String, ParseError> {
        match self {
            Converter::DocParser(b) => b.submit(source).await,
            Converter::MinerU(b) => b.submit(source).await,
        }
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, ParseError> {
        match self {
            Converter::DocParser(b) => b.poll(job_id).await,
            Converter::MinerU(b) => b.poll(job_id).await,
        }
    }

    async fn fetch(
        &self,
        job: &ConversionJob,
        run_dir: &Path,
    ) -> Result<RawConversion, ParseError> {
        match self {
            Converter::DocParser(b) => b.fetch(job, run_dir).await,
            Converter::MinerU(b) => b.fetch(job, run_dir).await,
        }
    }
}

/// Non-2xx answer from a backend, as a network-level error.
pub(crate) async fn http_failure(operation: &str, resp: reqwest::Response) -> ParseError {
    let status = resp.status();
    let body = crate::http::error_body(resp).await;
    ParseError::Network {
        operation: operation.to_string(),
        detail: format!("HTTP {status}: {body}"),
        timed_out: false,
    }
}
