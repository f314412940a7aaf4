//! # docparse-relay
//!
//! Convert PDF and Word documents to self-contained Markdown through an
//! external document-understanding service, then re-host every image the
//! service produced in a MediaStore you control.
//!
//! ## Why this crate?
//!
//! Conversion services hand back Markdown whose images live in their own
//! short-lived object storage or inside a downloaded result archive. Links
//! to either stop working within hours. This crate copies each image into
//! a content-addressed store (same bytes, same key, uploaded once) and
//! rewrites the Markdown to the permanent URLs, leaving every other byte
//! of the text untouched.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document
//!  │
//!  ├─ 1. Input    validate name, extension, size; derive the document id
//!  ├─ 2. Submit   upload to the selected backend, get a job id
//!  ├─ 3. Poll     fixed interval, bounded attempts, cancellable
//!  ├─ 4. Fetch    paginated layout text, or zip/tar.gz result archive
//!  ├─ 5. Rewrite  download/read images → MediaStore → permanent URLs
//!  └─ 6. Output   Markdown + image count + timings
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docparse_relay::{Pipeline, PipelineConfig, SourceDocument};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .docparser_url("https://parser.internal/api")
//!         .docparser_token(std::env::var("DOCPARSE_TOKEN")?)
//!         .bucket_endpoint("https://objects.internal")
//!         .bucket_name("kb-images")
//!         .namespace("kb-42")
//!         .build()?;
//!
//!     let pipeline = Pipeline::new(config)?;
//!     let source = SourceDocument {
//!         bytes: std::fs::read("report.pdf")?,
//!         file_name: "report.pdf".into(),
//!     };
//!     let output = pipeline.convert(source).await?;
//!     println!("{}", output.markdown);
//!     eprintln!("{} image(s) in {}ms", output.image_count, output.processing_time_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docparse` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docparse-relay = { version = "0.1", default-features = false }
//! ```
//!
//! ## Backends and stores
//!
//! | Backend | Result | Images |
//! |---------|--------|--------|
//! | `docparser` | paginated layout fragments | remote URLs on the vendor's storage |
//! | `mineru`    | zip / tar.gz archive        | files beside the Markdown in the archive |
//!
//! | Store | Addressing |
//! |-------|------------|
//! | `bucket`      | `PUT {endpoint}/{bucket}/{namespace}/{scope}/{hash}{ext}` |
//! | `content-api` | repository contents API, served through a CDN |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod convert;
pub mod error;
pub mod hash;
pub mod http;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{Converter, RawConversion, SourceDocument};
pub use config::{BackendKind, PipelineConfig, PipelineConfigBuilder, StorageKind};
pub use convert::{convert, write_markdown, Pipeline};
pub use error::{ImageError, ParseError, StoreError};
pub use hash::content_hash;
pub use output::{ConversionOutput, ResolvedImage};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use store::MediaStore;
