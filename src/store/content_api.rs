//! Git-content-API-style storage served through a CDN.
//!
//! Each image becomes a file in a repository, created with
//! `PUT /repos/{repo}/contents/{path}`. The host has no folders, so deleting
//! a scope lists the scope's files and deletes them one at a time. When the
//! listing itself is unavailable the delete degrades to a logged no-op.

use super::{object_key, scope_path, MediaStore};
use crate::config::ContentApiConfig;
use crate::error::StoreError;
use crate::http::{error_body, join_url};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const ACCEPT_V3: &str = "application/vnd.github.v3+json";

/// MediaStore over a version-controlled content host.
pub struct ContentApiStore {
    client: reqwest::Client,
    cfg: ContentApiConfig,
    written: Mutex<HashSet<String>>,
}

#[derive(Serialize)]
struct CreateFile<'a> {
    message: String,
    content: String,
    branch: &'a str,
}

#[derive(Serialize)]
struct DeleteFile<'a> {
    message: String,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Deserialize)]
struct ListedEntry {
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

impl ContentApiStore {
    pub fn new(client: reqwest::Client, cfg: ContentApiConfig) -> Self {
        Self {
            client,
            cfg,
            written: Mutex::new(HashSet::new()),
        }
    }

    /// Repository path of everything under `namespace`/`scope`.
    fn scope_dir(&self, namespace: &str, scope: &str) -> String {
        format!("{}{}", self.cfg.path_prefix, scope_path(namespace, scope))
    }

    fn contents_url(&self, path: &str) -> String {
        join_url(
            &self.cfg.api_base_url,
            &format!("repos/{}/contents/{}", self.cfg.repo, path),
        )
    }

    /// Base under which every public URL of this store lives.
    pub fn public_base(&self) -> String {
        let cdn = self.cfg.cdn.trim_end_matches('/');
        let cdn = if cdn.contains("://") {
            cdn.to_string()
        } else {
            format!("https://{cdn}")
        };
        format!("{}/gh/{}@{}", cdn, self.cfg.repo, self.cfg.branch)
    }

    fn public_url(&self, path: &str) -> String {
        join_url(&self.public_base(), path)
    }

    fn request(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header(ACCEPT, ACCEPT_V3);
        match self.cfg.token.as_deref() {
            Some(token) if !token.is_empty() => req.header("Authorization", format!("token {token}")),
            _ => req,
        }
    }

    async fn list_scope(&self, dir: &str) -> Option<Vec<ListedEntry>> {
        let resp = self
            .request(self.client.get(self.contents_url(dir)))
            .query(&[("ref", self.cfg.branch.as_str())])
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => match r.json::<Vec<ListedEntry>>().await {
                Ok(entries) => Some(entries),
                Err(e) => {
                    warn!("Listing '{}' returned an unexpected body: {}", dir, e);
                    None
                }
            },
            Ok(r) => {
                // 404 (nothing stored), 405/501 (listing unsupported) and the rest
                // all mean there is nothing this store can delete.
                warn!("Listing '{}' returned HTTP {}; skipping delete", dir, r.status());
                None
            }
            Err(e) => {
                warn!("Listing '{}' failed: {}; skipping delete", dir, e);
                None
            }
        }
    }

    async fn delete_file(&self, entry: &ListedEntry) -> bool {
        let body = DeleteFile {
            message: format!("Delete image {}", entry.path),
            sha: &entry.sha,
            branch: &self.cfg.branch,
        };
        match self
            .request(self.client.delete(self.contents_url(&entry.path)))
            .json(&body)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                warn!("Deleting '{}' returned HTTP {}", entry.path, r.status());
                false
            }
            Err(e) => {
                warn!("Deleting '{}' failed: {}", entry.path, e);
                false
            }
        }
    }
}

#[async_trait]
impl MediaStore for ContentApiStore {
    fn name(&self) -> &'static str {
        "content-api"
    }

    async fn put(
        &self,
        bytes: &[u8],
        namespace: &str,
        scope: &str,
        suggested_name: &str,
    ) -> Result<String, StoreError> {
        let key = object_key(bytes, suggested_name);
        let path = format!("{}/{}", self.scope_dir(namespace, scope), key);

        if self.written.lock().await.contains(&path) {
            debug!("Content file {} already written, skipping upload", path);
            return Ok(self.public_url(&path));
        }

        let body = CreateFile {
            message: format!("Upload image {key}"),
            content: base64::engine::general_purpose::STANDARD.encode(bytes),
            branch: &self.cfg.branch,
        };
        let operation = format!("create {path}");
        let resp = self
            .request(self.client.put(self.contents_url(&path)))
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::network(operation.clone(), e))?;

        match resp.status() {
            s if s.is_success() => debug!("Created {} ({} bytes)", path, bytes.len()),
            // The file already exists: same content hash, same bytes.
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                debug!("{} already present (HTTP {})", path, resp.status())
            }
            s => {
                return Err(StoreError::Http {
                    operation,
                    status: s.as_u16(),
                    body: error_body(resp).await,
                })
            }
        }

        self.written.lock().await.insert(path.clone());
        Ok(self.public_url(&path))
    }

    async fn delete_scope(&self, namespace: &str, scope: &str) -> usize {
        let dir = self.scope_dir(namespace, scope);
        let Some(entries) = self.list_scope(&dir).await else {
            return 0;
        };

        let mut deleted = 0;
        for entry in entries.iter().filter(|e| e.kind == "file") {
            if self.delete_file(entry).await {
                deleted += 1;
            }
        }

        let mut written = self.written.lock().await;
        let prefix = format!("{dir}/");
        written.retain(|p| !p.starts_with(&prefix));

        info!("Deleted {}/{} file(s) under '{}'", deleted, entries.len(), dir);
        deleted
    }

    fn owns_url(&self, url: &str) -> bool {
        url.starts_with(&format!("{}/", self.public_base()))
    }
}
