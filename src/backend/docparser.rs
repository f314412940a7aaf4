//! Layout-result converter.
//!
//! The service converts a document into an ordered list of layout blocks,
//! each carrying a Markdown fragment. Results are read in pages of
//! `layout_step_size` blocks; the fragments are joined with a blank line.
//! Images in the fragments are links into the vendor's own (temporary)
//! object storage, so this backend never produces a media root.
//!
//! | Call | Request | Answer (`data`) |
//! |---|---|---|
//! | submit | `POST /jobs` multipart | `{ id }` |
//! | poll   | `GET /jobs/{id}/status` | `{ status, message }` |
//! | fetch  | `GET /jobs/{id}/result?layout_num=N&layout_step_size=S` | `{ layouts: [{ markdown_content }] }` |

use super::{http_failure, RawConversion, SourceDocument};
use crate::config::{BackendKind, DocParserConfig};
use crate::error::ParseError;
use crate::http::{error_body, join_url};
use crate::pipeline::job::{ConversionBackend, ConversionJob, JobStatus};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Client for the layout-result conversion service.
pub struct DocParserBackend {
    client: reqwest::Client,
    cfg: DocParserConfig,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    #[serde(default)]
    status: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultData {
    #[serde(default)]
    layouts: Vec<Layout>,
}

#[derive(Debug, Deserialize)]
struct Layout {
    markdown_content: Option<String>,
}

impl DocParserBackend {
    pub fn new(client: reqwest::Client, cfg: DocParserConfig) -> Self {
        Self { client, cfg }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.cfg.base_url, path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.cfg.access_token.as_deref() {
            Some(token) if !token.is_empty() => req.bearer_auth(token),
            _ => req,
        }
    }

    fn submit_form(&self, source: &SourceDocument) -> Form {
        let file = Part::bytes(source.bytes.clone()).file_name(source.file_name.clone());
        let mut form = Form::new()
            .part("file", file)
            .text("llm_enhancement", self.cfg.llm_enhancement.to_string());

        let mode = self.cfg.enhancement_mode.trim();
        if self.cfg.llm_enhancement && !mode.is_empty() {
            form = form.text("enhancement_mode", mode.to_string());
        }
        if self.cfg.output_html_table {
            form = form.text("output_html_table", "true");
        }

        form.text("enable_formula", self.cfg.enable_formula.to_string())
            .text("enable_table", self.cfg.enable_table.to_string())
            .text("enable_ocr", self.cfg.enable_ocr.to_string())
    }

    fn backend_name(&self) -> String {
        BackendKind::DocParser.to_string()
    }

    async fn fetch_page(
        &self,
        job_id: &str,
        cursor: u32,
    ) -> Result<Vec<Layout>, ParseError> {
        let step = self.cfg.layout_step_size.max(1);
        let operation = format!("result page at layout {cursor} of job {job_id}");
        let resp = self
            .authorized(self.client.get(self.url(&format!("jobs/{job_id}/result"))))
            .query(&[("layout_num", cursor), ("layout_step_size", step)])
            .send()
            .await
            .map_err(|e| ParseError::network(operation.clone(), e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(ParseError::Fetch {
                backend: self.backend_name(),
                job_id: job_id.to_string(),
                reason: format!("HTTP {status} for {operation}: {}", error_body(resp).await),
            });
        }

        let envelope: Envelope<ResultData> = resp.json().await.map_err(|e| ParseError::Fetch {
            backend: self.backend_name(),
            job_id: job_id.to_string(),
            reason: format!("malformed {operation}: {e}"),
        })?;
        Ok(envelope.data.map(|d| d.layouts).unwrap_or_default())
    }
}

impl ConversionBackend for DocParserBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DocParser
    }

    async fn submit(&self, source: &SourceDocument) -> Result<String, ParseError> {
        let resp = self
            .authorized(self.client.post(self.url("jobs")))
            .multipart(self.submit_form(source))
            .send()
            .await
            .map_err(|e| ParseError::network("submit document", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ParseError::Submission {
                backend: self.backend_name(),
                message: format!("HTTP {status}: {}", error_body(resp).await),
            });
        }

        let envelope: Envelope<SubmitData> =
            resp.json().await.map_err(|e| ParseError::Submission {
                backend: self.backend_name(),
                message: format!("malformed submit response: {e}"),
            })?;

        match envelope.data.and_then(|d| d.id).filter(|id| !id.trim().is_empty()) {
            Some(id) => Ok(id),
            None => Err(ParseError::Submission {
                backend: self.backend_name(),
                message: envelope
                    .message
                    .unwrap_or_else(|| "response carried no job id".into()),
            }),
        }
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, ParseError> {
        let operation = format!("status of job {job_id}");
        let resp = self
            .authorized(self.client.get(self.url(&format!("jobs/{job_id}/status"))))
            .send()
            .await
            .map_err(|e| ParseError::network(operation.clone(), e))?;

        if !resp.status().is_success() {
            return Err(http_failure(&operation, resp).await);
        }

        let envelope: Envelope<StatusData> = resp.json().await.map_err(|e| ParseError::Network {
            operation: operation.clone(),
            detail: format!("malformed status response: {e}"),
            timed_out: false,
        })?;

        let data = envelope.data.unwrap_or(StatusData {
            status: String::new(),
            message: None,
        });
        let status = data.status.trim().to_ascii_lowercase();
        Ok(match status.as_str() {
            "success" => JobStatus::Succeeded {
                result_locator: None,
            },
            "fail" | "failed" => JobStatus::Failed {
                message: data
                    .message
                    .or(envelope.message)
                    .unwrap_or_else(|| "no message from backend".into()),
            },
            "" => JobStatus::Running { detail: None },
            _ => JobStatus::Running {
                detail: Some(data.status),
            },
        })
    }

    async fn fetch(
        &self,
        job: &ConversionJob,
        _run_dir: &Path,
    ) -> Result<RawConversion, ParseError> {
        let job_id = job.job_id();
        let step = self.cfg.layout_step_size.max(1);
        let mut cursor: u32 = 0;
        let mut fragments: Vec<String> = Vec::new();
        let mut pages = 0usize;

        loop {
            let layouts = self.fetch_page(job_id, cursor).await?;
            pages += 1;
            let returned = layouts.len();
            debug!("Job {}: page {} returned {} layout block(s)", job_id, pages, returned);

            fragments.extend(
                layouts
                    .into_iter()
                    .filter_map(|l| l.markdown_content)
                    .filter(|md| !md.trim().is_empty()),
            );

            if returned == 0 || returned < step as usize {
                break;
            }
            cursor += returned as u32;
        }

        let markdown = fragments.join("\n\n").trim().to_string();
        if markdown.is_empty() {
            return Err(ParseError::Fetch {
                backend: self.backend_name(),
                job_id: job_id.to_string(),
                reason: format!("{pages} result page(s) held no Markdown"),
            });
        }

        Ok(RawConversion {
            markdown,
            media_root: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::job::{ImmediatePacer, JobRunner};
    use crate::progress::NoopProgressCallback;
    use crate::config::PollingConfig;
    use mockito::Matcher;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn backend(server: &mockito::Server) -> DocParserBackend {
        backend_with(server, DocParserConfig::default())
    }

    fn backend_with(server: &mockito::Server, cfg: DocParserConfig) -> DocParserBackend {
        DocParserBackend::new(
            reqwest::Client::new(),
            DocParserConfig {
                base_url: server.url(),
                access_token: Some("dp-token".into()),
                ..cfg
            },
        )
    }

    fn layouts_body(start: usize, count: usize) -> String {
        let layouts: Vec<_> = (start..start + count)
            .map(|i| json!({ "markdown_content": format!("block {i}") }))
            .collect();
        json!({ "code": 200, "message": "ok", "data": { "layouts": layouts } }).to_string()
    }

    fn page_query(cursor: u32, step: u32) -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("layout_num".into(), cursor.to_string()),
            Matcher::UrlEncoded("layout_step_size".into(), step.to_string()),
        ])
    }

    async fn succeeded_job(b: &DocParserBackend, server: &mut mockito::Server) -> ConversionJob {
        let _submit = server
            .mock("POST", "/jobs")
            .with_status(200)
            .with_body(r#"{"code":200,"data":{"id":"job-1"}}"#)
            .create_async()
            .await;
        let _status = server
            .mock("GET", "/jobs/job-1/status")
            .with_status(200)
            .with_body(r#"{"data":{"status":"SUCCESS"}}"#)
            .create_async()
            .await;

        let runner = JobRunner::new(
            b,
            PollingConfig::default(),
            &ImmediatePacer,
            CancellationToken::new(),
            &NoopProgressCallback,
        );
        let source = SourceDocument {
            bytes: b"%PDF".to_vec(),
            file_name: "a.pdf".into(),
        };
        let mut job = runner.submit(&source).await.unwrap();
        runner.wait(&mut job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn submit_sends_multipart_with_toggles() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/jobs")
            .match_header("authorization", "Bearer dp-token")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data; boundary=".into()),
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="file"; filename="report.pdf""#.into()),
                Matcher::Regex(r#"name="enhancement_mode"\r\n\r\nVLM"#.into()),
                Matcher::Regex(r#"name="enable_ocr"\r\n\r\nfalse"#.into()),
            ]))
            .with_status(200)
            .with_body(r#"{"code":200,"message":"ok","data":{"id":"job-77"}}"#)
            .expect(1)
            .create_async()
            .await;

        let id = backend(&server)
            .submit(&SourceDocument {
                bytes: b"%PDF-1.4".to_vec(),
                file_name: "report.pdf".into(),
            })
            .await
            .unwrap();
        assert_eq!(id, "job-77");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn submit_without_id_is_a_submission_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/jobs")
            .with_status(200)
            .with_body(r#"{"code":400,"message":"quota exceeded","data":null}"#)
            .create_async()
            .await;

        let err = backend(&server)
            .submit(&SourceDocument {
                bytes: b"x".to_vec(),
                file_name: "a.pdf".into(),
            })
            .await
            .unwrap_err();
        match err {
            ParseError::Submission { message, .. } => assert_eq!(message, "quota exceeded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_maps_statuses() {
        let mut server = mockito::Server::new_async().await;
        let b = backend(&server);
        let cases = [
            (r#"{"data":{"status":"Processing"}}"#, JobStatus::Running { detail: Some("Processing".into()) }),
            (r#"{"data":{"status":"success"}}"#, JobStatus::Succeeded { result_locator: None }),
            (
                r#"{"data":{"status":"Fail","message":"bad scan"}}"#,
                JobStatus::Failed { message: "bad scan".into() },
            ),
            (
                r#"{"message":"timeout upstream","data":{"status":"failed"}}"#,
                JobStatus::Failed { message: "timeout upstream".into() },
            ),
        ];

        for (i, (body, expected)) in cases.into_iter().enumerate() {
            let path = format!("/jobs/j{i}/status");
            let _m = server
                .mock("GET", path.as_str())
                .with_status(200)
                .with_body(body)
                .create_async()
                .await;
            assert_eq!(b.poll(&format!("j{i}")).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn poll_http_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/jobs/j/status")
            .with_status(502)
            .create_async()
            .await;

        let err = backend(&server).poll("j").await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }

    #[tokio::test]
    async fn fetch_paginates_until_short_page() {
        let mut server = mockito::Server::new_async().await;
        let b = backend(&server);
        let job = succeeded_job(&b, &mut server).await;

        let mut pages = Vec::new();
        for (cursor, count) in [(0u32, 1000usize), (1000, 1000), (2000, 400)] {
            pages.push(
                server
                    .mock("GET", "/jobs/job-1/result")
                    .match_query(page_query(cursor, 1000))
                    .with_status(200)
                    .with_body(layouts_body(cursor as usize, count))
                    .expect(1)
                    .create_async()
                    .await,
            );
        }

        let dir = tempfile::tempdir().unwrap();
        let raw = b.fetch(&job, dir.path()).await.unwrap();

        for page in &pages {
            page.assert_async().await;
        }
        assert!(raw.media_root.is_none());
        let blocks: Vec<&str> = raw.markdown.split("\n\n").collect();
        assert_eq!(blocks.len(), 2400);
        assert_eq!(blocks[0], "block 0");
        assert_eq!(blocks[1000], "block 1000");
        assert_eq!(blocks[2399], "block 2399");
    }

    #[tokio::test]
    async fn fetch_stops_on_empty_page_and_skips_blank_fragments() {
        let mut server = mockito::Server::new_async().await;
        let b = backend_with(
            &server,
            DocParserConfig {
                layout_step_size: 2,
                ..DocParserConfig::default()
            },
        );
        let job = succeeded_job(&b, &mut server).await;

        let _p0 = server
            .mock("GET", "/jobs/job-1/result")
            .match_query(page_query(0, 2))
            .with_body(
                json!({"data":{"layouts":[
                    {"markdown_content":"# Title"},
                    {"markdown_content":"  "}
                ]}})
                .to_string(),
            )
            .create_async()
            .await;
        let _p1 = server
            .mock("GET", "/jobs/job-1/result")
            .match_query(page_query(2, 2))
            .with_body(
                json!({"data":{"layouts":[
                    {"markdown_content":"![fig](https://vendor-oss.example.com/tmp/a.png)"},
                    {}
                ]}})
                .to_string(),
            )
            .create_async()
            .await;
        let last = server
            .mock("GET", "/jobs/job-1/result")
            .match_query(page_query(4, 2))
            .with_body(r#"{"data":{"layouts":[]}}"#)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let raw = b.fetch(&job, dir.path()).await.unwrap();
        assert_eq!(
            raw.markdown,
            "# Title\n\n![fig](https://vendor-oss.example.com/tmp/a.png)"
        );
        last.assert_async().await;
    }

    #[tokio::test]
    async fn empty_result_is_a_fetch_error() {
        let mut server = mockito::Server::new_async().await;
        let b = backend(&server);
        let job = succeeded_job(&b, &mut server).await;
        let _p = server
            .mock("GET", "/jobs/job-1/result")
            .match_query(Matcher::Any)
            .with_body(r#"{"data":{"layouts":[]}}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = b.fetch(&job, dir.path()).await.unwrap_err();
        assert!(matches!(err, ParseError::Fetch { .. }), "{err:?}");
    }
}
