//! Output types returned by the pipeline.

use crate::config::{BackendKind, StorageKind};
use crate::error::ImageError;
use serde::{Deserialize, Serialize};

/// Result of converting one document.
///
/// `markdown`, `image_count` and `processing_time_ms` are what most callers
/// need; the rest is diagnostic detail for persistence layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Final Markdown with every relocatable image pointing at the MediaStore.
    pub markdown: String,
    /// Number of distinct image targets that received a permanent URL.
    pub image_count: usize,
    /// Relocated images in first-occurrence order.
    pub images: Vec<ResolvedImage>,
    /// Images left unchanged because they could not be relocated.
    pub image_failures: Vec<ImageError>,
    /// Wall-clock time of the whole run.
    pub processing_time_ms: u64,
    /// Backend-assigned job identifier.
    pub job_id: String,
    pub backend: BackendKind,
    pub storage: StorageKind,
    pub namespace: String,
    /// Sanitised document identifier, used as the MediaStore scope.
    pub document_id: String,
    /// Status polls issued before the job reached a terminal state.
    pub poll_attempts: u32,
}

/// One image target relocated to permanent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedImage {
    /// 1-indexed position among the document's relocatable targets.
    ///
    /// This is the `n` of the `image_{n}` upload hint. Object keys are
    /// content hashes, so the sequence survives only here.
    pub index: usize,
    /// Alt text of the first occurrence.
    pub alt_text: String,
    /// The original reference string.
    pub target: String,
    /// Permanent MediaStore URL.
    pub url: String,
}

/// Result of rewriting one Markdown document.
#[derive(Debug, Clone, Default)]
pub struct RewriteOutcome {
    pub markdown: String,
    pub images: Vec<ResolvedImage>,
    pub failures: Vec<ImageError>,
}

impl RewriteOutcome {
    /// Permanent URLs in first-occurrence order.
    pub fn urls(&self) -> Vec<&str> {
        self.images.iter().map(|i| i.url.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_serialises_with_kind_names() {
        let out = ConversionOutput {
            markdown: "# Doc".into(),
            image_count: 1,
            images: vec![ResolvedImage {
                index: 1,
                alt_text: "fig".into(),
                target: "images/a.png".into(),
                url: "https://cdn/x.png".into(),
            }],
            image_failures: vec![ImageError::OutsideMediaRoot {
                target: "../etc/passwd".into(),
            }],
            processing_time_ms: 12,
            job_id: "job".into(),
            backend: BackendKind::MinerU,
            storage: StorageKind::ContentApi,
            namespace: "kb".into(),
            document_id: "report".into(),
            poll_attempts: 3,
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["backend"], "mineru");
        assert_eq!(json["storage"], "content-api");
        assert_eq!(json["images"][0]["index"], 1);
        assert!(json["image_failures"][0]["OutsideMediaRoot"].is_object());
    }

    #[test]
    fn urls_follow_image_order() {
        let outcome = RewriteOutcome {
            markdown: String::new(),
            images: vec![
                ResolvedImage {
                    index: 1,
                    alt_text: String::new(),
                    target: "a".into(),
                    url: "u1".into(),
                },
                ResolvedImage {
                    index: 2,
                    alt_text: String::new(),
                    target: "b".into(),
                    url: "u2".into(),
                },
            ],
            failures: vec![],
        };
        assert_eq!(outcome.urls(), vec!["u1", "u2"]);
    }
}
