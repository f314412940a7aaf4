//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to observe a
//! run as it moves through submit, poll, fetch and image relocation.
//!
//! # Example
//!
//! ```rust
//! use docparse_relay::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
//!
//! struct PollCounter {
//!     polls: AtomicU32,
//! }
//!
//! impl PipelineProgressCallback for PollCounter {
//!     fn on_poll(&self, _job_id: &str, attempt: u32, max_attempts: u32, _detail: Option<&str>) {
//!         self.polls.store(attempt, Ordering::SeqCst);
//!         eprintln!("poll {attempt}/{max_attempts}");
//!     }
//! }
//!
//! let counter = Arc::new(PollCounter { polls: AtomicU32::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .docparser_url("https://parser.example.com")
//!     .bucket_endpoint("https://objects.example.com")
//!     .bucket_name("kb")
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as a document moves through its stages.
///
/// Implementations must be `Send + Sync`: image events fire from
/// concurrently running resolution tasks. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// The backend accepted the document.
    fn on_submitted(&self, backend: &str, job_id: &str) {
        let _ = (backend, job_id);
    }

    /// A status poll returned.
    ///
    /// # Arguments
    /// * `attempt`      - 1-indexed poll number
    /// * `max_attempts` - configured poll bound
    /// * `detail`       - backend-specific progress text (e.g. `"12/40 pages"`)
    fn on_poll(&self, job_id: &str, attempt: u32, max_attempts: u32, detail: Option<&str>) {
        let _ = (job_id, attempt, max_attempts, detail);
    }

    /// Raw Markdown was retrieved.
    ///
    /// # Arguments
    /// * `markdown_len`  - byte length of the raw Markdown
    /// * `image_targets` - distinct image targets found in it
    fn on_fetched(&self, job_id: &str, markdown_len: usize, image_targets: usize) {
        let _ = (job_id, markdown_len, image_targets);
    }

    /// One image target now has a permanent URL.
    fn on_image_resolved(&self, target: &str, url: &str) {
        let _ = (target, url);
    }

    /// One image target could not be relocated and stays as-is.
    fn on_image_failed(&self, target: &str, error: &str) {
        let _ = (target, error);
    }

    /// The run finished successfully.
    fn on_complete(&self, image_count: usize, failed_images: usize, elapsed_ms: u64) {
        let _ = (image_count, failed_images, elapsed_ms);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        polls: AtomicUsize,
        resolved: Mutex<Vec<String>>,
        failed: AtomicUsize,
    }

    impl PipelineProgressCallback for Recorder {
        fn on_poll(&self, _job_id: &str, _attempt: u32, _max: u32, _detail: Option<&str>) {
            self.polls.fetch_add(1, Ordering::SeqCst);
        }

        fn on_image_resolved(&self, _target: &str, url: &str) {
            self.resolved.lock().unwrap().push(url.to_string());
        }

        fn on_image_failed(&self, _target: &str, _error: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_submitted("docparser", "job-1");
        cb.on_poll("job-1", 1, 200, Some("3/10 pages"));
        cb.on_fetched("job-1", 1024, 3);
        cb.on_image_resolved("a.png", "https://cdn/x.png");
        cb.on_image_failed("b.png", "missing");
        cb.on_complete(1, 1, 42);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Recorder::default();
        rec.on_submitted("mineru", "batch");
        rec.on_poll("batch", 1, 5, None);
        rec.on_poll("batch", 2, 5, None);
        rec.on_image_resolved("img.png", "https://cdn/one.png");
        rec.on_image_failed("gone.png", "not found");

        assert_eq!(rec.polls.load(Ordering::SeqCst), 2);
        assert_eq!(*rec.resolved.lock().unwrap(), vec!["https://cdn/one.png"]);
        assert_eq!(rec.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_submitted("docparser", "j");
        cb.on_complete(0, 0, 1);
    }
}
