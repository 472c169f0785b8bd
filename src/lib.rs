//! # edgequake-bookmarker
//!
//! Turn the printed table of contents of a PDF into a navigable bookmark
//! outline, using a vision language model to read the TOC pages.
//!
//! ## Why this crate?
//!
//! Scanned books and many exported PDFs carry a perfectly readable table of
//! contents but no outline, so viewers show an empty bookmark pane. Text
//! extraction is useless on scans and unreliable on multi-column TOCs. This
//! crate rasterises each TOC page, asks a VLM to read it as a person would,
//! then does the careful part itself: tolerant parsing, page-offset
//! correction, and a level repair that guarantees a well-formed tree.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      read local file or download from URL
//!  ├─ 2. Render     rasterise each TOC page via pdfium (spawn_blocking)
//!  ├─ 3. Vision     one model call per page, retried per RetryPolicy
//!  ├─ 4. Parse      near-JSON → typed candidates (one bounded recovery)
//!  ├─ 5. Normalize  printed page + offset → physical page, clamped
//!  ├─ 6. Reconcile  merge pages in order, repair level jumps
//!  └─ 7. Write      validate and commit /Outlines via lopdf
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_bookmarker::{bookmark_file, BookmarkConfig, PageRange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // TOC printed on physical pages 5-7; printed page 1 is physical page 15.
//!     let config = BookmarkConfig::builder()
//!         .base_url("https://api.deepseek.com")
//!         .api_key(std::env::var("DEEPSEEK_API_KEY")?)
//!         .pages(PageRange::new(5, 7))
//!         .page_offset(14)
//!         .build()?;
//!     let report = bookmark_file("book.pdf", "bookmarked_book.pdf", &config).await?;
//!     print!("{}", report.outline.render_text());
//!     for w in &report.warnings {
//!         eprintln!("warning: {w}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-bookmark` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-bookmarker = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bookmark;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod settings;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use bookmark::{
    bookmark_bytes, bookmark_file, bookmark_file_sync, commit_outline, extract_outline, preview,
    vision_client,
};
pub use config::{
    BookmarkConfig, BookmarkConfigBuilder, FailurePolicy, ModelConfig, PageRange, RetryPolicy,
};
pub use error::{BookmarkError, ExtractionCause, PageError, ValidationWarning};
pub use output::{BookmarkReport, BookmarkedPdf, PageReport, RunStats};
pub use pipeline::reconcile::{Outline, OutlineEntry, OutlineNode};
pub use pipeline::render::{RasterError, Rasterizer};
pub use pipeline::vision::VisionClient;
pub use pipeline::write::{LopdfOutlineWriter, OutlineWriter};
pub use progress::{BookmarkProgressCallback, NoopProgressCallback, ProgressCallback};
