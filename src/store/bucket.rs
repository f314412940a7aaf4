//! Bucket-style object storage.
//!
//! Objects are written with `PUT {endpoint}/{bucket}/{key}` and removed in
//! bulk with `DELETE {endpoint}/{bucket}?prefix={namespace}/{scope}/`.

use super::{content_type_for, object_key, scope_path, MediaStore};
use crate::config::BucketStoreConfig;
use crate::error::StoreError;
use crate::http::{error_body, join_url};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// MediaStore over a flat key-value object space.
pub struct BucketStore {
    client: reqwest::Client,
    cfg: BucketStoreConfig,
    /// Keys this instance has already written.
    written: Mutex<HashSet<String>>,
}

impl BucketStore {
    pub fn new(client: reqwest::Client, cfg: BucketStoreConfig) -> Self {
        Self {
            client,
            cfg,
            written: Mutex::new(HashSet::new()),
        }
    }

    fn bucket_base(&self) -> String {
        join_url(&self.cfg.endpoint, &self.cfg.bucket)
    }

    /// Base under which every public URL of this store lives.
    pub fn public_base(&self) -> String {
        match self.cfg.public_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(domain) => domain.trim_end_matches('/').to_string(),
            None => self.bucket_base(),
        }
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base(), key)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.cfg.access_token.as_deref() {
            Some(token) if !token.is_empty() => req.bearer_auth(token),
            _ => req,
        }
    }
}

#[derive(serde::Deserialize)]
struct DeleteSummary {
    deleted: usize,
}

#[async_trait]
impl MediaStore for BucketStore {
    fn name(&self) -> &'static str {
        "bucket"
    }

    async fn put(
        &self,
        bytes: &[u8],
        namespace: &str,
        scope: &str,
        suggested_name: &str,
    ) -> Result<String, StoreError> {
        let key = format!("{}/{}", scope_path(namespace, scope), object_key(bytes, suggested_name));

        if self.written.lock().await.contains(&key) {
            debug!("Bucket object {} already written, skipping upload", key);
            return Ok(self.public_url(&key));
        }

        let url = join_url(&self.bucket_base(), &key);
        let operation = format!("PUT {key}");
        let resp = self
            .authorized(self.client.put(&url))
            .header(CONTENT_TYPE, content_type_for(&key))
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| StoreError::network(operation.clone(), e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StoreError::Http {
                operation,
                status: status.as_u16(),
                body: error_body(resp).await,
            });
        }

        debug!("Stored {} bytes as {}", bytes.len(), key);
        self.written.lock().await.insert(key.clone());
        Ok(self.public_url(&key))
    }

    async fn delete_scope(&self, namespace: &str, scope: &str) -> usize {
        let prefix = format!("{}/", scope_path(namespace, scope));
        let resp = self
            .authorized(self.client.delete(self.bucket_base()))
            .query(&[("prefix", prefix.as_str())])
            .send()
            .await;

        let resp = match resp {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(
                    "Bucket prefix delete of '{}' returned HTTP {}; leaving objects in place",
                    prefix,
                    r.status()
                );
                return 0;
            }
            Err(e) => {
                warn!("Bucket prefix delete of '{}' failed: {}", prefix, e);
                return 0;
            }
        };

        let mut written = self.written.lock().await;
        let remembered = written.iter().filter(|k| k.starts_with(&prefix)).count();
        written.retain(|k| !k.starts_with(&prefix));

        // Stores that report a count win over what this instance remembers.
        let deleted = match resp.json::<DeleteSummary>().await {
            Ok(summary) => summary.deleted,
            Err(_) => remembered,
        };
        info!("Deleted {} object(s) under '{}'", deleted, prefix);
        deleted
    }

    fn owns_url(&self, url: &str) -> bool {
        url.starts_with(&format!("{}/", self.public_base()))
    }
}
