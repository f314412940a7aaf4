//! Archive-result converter.
//!
//! Submission is two-step: ask for a pre-signed upload slot, then `PUT` the
//! raw bytes into it; the service starts converting once the upload lands.
//! A finished batch points at a zip archive holding the Markdown and the
//! images it references by relative path.
//!
//! Responses use the envelope `{ code, msg, data }` where `code == 0` is success.

use super::{http_failure, RawConversion, SourceDocument};
use crate::config::{BackendKind, MinerUConfig};
use crate::error::ParseError;
use crate::http::{error_body, join_url};
use crate::pipeline::job::{ConversionBackend, ConversionJob, JobStatus};
use crate::store::sanitize_segment;
use archive_unpack::ArchiveError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Client for the archive-result conversion service.
pub struct MinerUBackend {
    client: reqwest::Client,
    cfg: MinerUConfig,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    msg: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    /// `data` when `code == 0`, else the service's message.
    fn into_data(self) -> Result<T, String> {
        if self.code != 0 {
            return Err(format!(
                "code {}: {}",
                self.code,
                self.msg.unwrap_or_else(|| "no message".into())
            ));
        }
        self.data.ok_or_else(|| "response carried no data".to_string())
    }
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    files: Vec<BatchFile<'a>>,
    model_version: &'a str,
    enable_formula: bool,
    enable_table: bool,
    language: &'a str,
}

#[derive(Serialize)]
struct BatchFile<'a> {
    name: &'a str,
    is_ocr: bool,
}

#[derive(Debug, Deserialize)]
struct BatchSlot {
    batch_id: Option<String>,
    #[serde(default)]
    file_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchResults {
    #[serde(default)]
    extract_result: Vec<ExtractResult>,
}

#[derive(Debug, Deserialize)]
struct ExtractResult {
    #[serde(default)]
    state: String,
    full_zip_url: Option<String>,
    err_msg: Option<String>,
    extract_progress: Option<ExtractProgress>,
}

#[derive(Debug, Deserialize)]
struct ExtractProgress {
    extracted_pages: Option<u64>,
    total_pages: Option<u64>,
}

impl MinerUBackend {
    pub fn new(client: reqwest::Client, cfg: MinerUConfig) -> Self {
        Self { client, cfg }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.cfg.base_url, path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.cfg.api_token.as_deref() {
            Some(token) if !token.is_empty() => req.bearer_auth(token),
            _ => req,
        }
    }

    fn backend_name(&self) -> String {
        BackendKind::MinerU.to_string()
    }

    fn submission_error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Submission {
            backend: self.backend_name(),
            message: message.into(),
        }
    }

    fn fetch_error(&self, job_id: &str, reason: impl Into<String>) -> ParseError {
        ParseError::Fetch {
            backend: self.backend_name(),
            job_id: job_id.to_string(),
            reason: reason.into(),
        }
    }

    async fn request_upload_slot(&self, file_name: &str) -> Result<(String, String), ParseError> {
        let body = BatchRequest {
            files: vec![BatchFile {
                name: file_name,
                is_ocr: self.cfg.is_ocr,
            }],
            model_version: &self.cfg.model_version,
            enable_formula: self.cfg.enable_formula,
            enable_table: self.cfg.enable_table,
            language: &self.cfg.language,
        };

        let resp = self
            .authorized(self.client.post(self.url("file-urls/batch")))
            .json(&body)
            .send()
            .await
            .map_err(|e| ParseError::network("request upload slot", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(self.submission_error(format!(
                "upload slot request returned HTTP {status}: {}",
                error_body(resp).await
            )));
        }

        let slot = resp
            .json::<Envelope<BatchSlot>>()
            .await
            .map_err(|e| self.submission_error(format!("malformed upload slot response: {e}")))?
            .into_data()
            .map_err(|m| self.submission_error(m))?;

        let batch_id = slot
            .batch_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| self.submission_error("response carried no batch id"))?;
        let upload_url = slot
            .file_urls
            .into_iter()
            .next()
            .ok_or_else(|| self.submission_error("response carried no upload URL"))?;
        Ok((batch_id, upload_url))
    }

    async fn download_archive(&self, job_id: &str, url: &str) -> Result<Vec<u8>, ParseError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ParseError::network(format!("download result archive of {job_id}"), e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(self.fetch_error(
                job_id,
                format!("archive download returned HTTP {status}: {}", error_body(resp).await),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ParseError::network(format!("read result archive of {job_id}"), e))?;
        Ok(bytes.to_vec())
    }
}

impl ConversionBackend for MinerUBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MinerU
    }

    async fn submit(&self, source: &SourceDocument) -> Result<String, ParseError> {
        let (batch_id, upload_url) = self.request_upload_slot(&source.file_name).await?;
        debug!("Batch {}: uploading {} bytes", batch_id, source.bytes.len());

        // The pre-signed URL is bound to an empty content type.
        let resp = self
            .client
            .put(&upload_url)
            .body(source.bytes.clone())
            .send()
            .await
            .map_err(|e| ParseError::network("upload source to pre-signed slot", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(self.submission_error(format!(
                "source upload returned HTTP {status}: {}",
                error_body(resp).await
            )));
        }

        Ok(batch_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, ParseError> {
        let operation = format!("status of batch {job_id}");
        let resp = self
            .authorized(
                self.client
                    .get(self.url(&format!("extract-results/batch/{job_id}"))),
            )
            .send()
            .await
            .map_err(|e| ParseError::network(operation.clone(), e))?;

        if !resp.status().is_success() {
            return Err(http_failure(&operation, resp).await);
        }

        let results = resp
            .json::<Envelope<BatchResults>>()
            .await
            .map_err(|e| format!("malformed status response: {e}"))
            .and_then(Envelope::into_data)
            .map_err(|detail| ParseError::Network {
                operation: operation.clone(),
                detail,
                timed_out: false,
            })?;

        let Some(result) = results.extract_result.into_iter().next() else {
            return Ok(JobStatus::Running {
                detail: Some("queued".into()),
            });
        };

        Ok(match result.state.as_str() {
            "done" => JobStatus::Succeeded {
                result_locator: result.full_zip_url,
            },
            "failed" => JobStatus::Failed {
                message: result
                    .err_msg
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "no message from backend".into()),
            },
            state => {
                let pages = result.extract_progress.and_then(|p| {
                    Some(format!("{}/{} pages", p.extracted_pages?, p.total_pages?))
                });
                JobStatus::Running {
                    detail: Some(match pages {
                        Some(pages) => format!("{state}: {pages}"),
                        None => state.to_string(),
                    }),
                }
            }
        })
    }

    async fn fetch(
        &self,
        job: &ConversionJob,
        run_dir: &Path,
    ) -> Result<RawConversion, ParseError> {
        let job_id = job.job_id().to_string();
        let url = job
            .result_locator()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| self.fetch_error(&job_id, "finished batch carried no archive URL"))?;

        let bytes = self.download_archive(&job_id, url).await?;
        let (archive_path, extract_dir) = scratch_paths(run_dir, &job_id);
        tokio::fs::write(&archive_path, &bytes)
            .await
            .map_err(|e| ParseError::io(format!("write {}", archive_path.display()), e))?;

        let unpack_from = archive_path.clone();
        let unpack_to = extract_dir.clone();
        let unpacked: Result<PathBuf, ArchiveError> = tokio::task::spawn_blocking(move || {
            archive_unpack::unpack_file(&unpack_from, &unpack_to)?;
            archive_unpack::find_first_markdown(&unpack_to)
        })
        .await
        .map_err(|e| ParseError::Internal(format!("archive task panicked: {e}")))?;

        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            warn!("Could not remove archive {}: {}", archive_path.display(), e);
        }

        let markdown_path = unpacked.map_err(|e| match e {
            ArchiveError::NoMarkdown { root } => ParseError::MissingOutput {
                job_id: job_id.clone(),
                dir: root,
            },
            other => self.fetch_error(&job_id, other.to_string()),
        })?;

        let markdown = tokio::fs::read_to_string(&markdown_path)
            .await
            .map_err(|e| ParseError::io(format!("read {}", markdown_path.display()), e))?;
        let media_root = markdown_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(extract_dir);

        info!(
            "Batch {}: extracted {} ({} bytes)",
            job_id,
            markdown_path.display(),
            markdown.len()
        );
        Ok(RawConversion {
            markdown,
            media_root: Some(media_root),
        })
    }
}

/// Archive file and extraction directory for one batch inside `run_dir`.
///
/// Batch ids come from the service, so they are reduced to a single path
/// segment before being joined.
fn scratch_paths(run_dir: &Path, job_id: &str) -> (PathBuf, PathBuf) {
    let stem = sanitize_segment(job_id);
    (
        run_dir.join(format!("{stem}.zip")),
        run_dir.join(format!("extract_{stem}")),
    )
}
