//! Pipeline stages for document-to-Markdown conversion.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ job ───────────────────────────▶ rewrite
//! (validate)  (submit ▸ poll … ▸ fetch)       (relocate images)
//! ```
//!
//! 1. [`input`]   - validate the source and derive its document id
//! 2. [`job`]     - drive one remote conversion job to a terminal state;
//!    the only stage that talks to a conversion backend
//! 3. [`rewrite`] - copy every transient image into the MediaStore and
//!    point the Markdown at the permanent URLs

pub mod input;
pub mod job;
pub mod rewrite;
