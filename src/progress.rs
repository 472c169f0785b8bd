//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn BookmarkProgressCallback>`] via
//! [`crate::config::BookmarkConfigBuilder::progress_callback`] to receive
//! events as the pipeline walks the TOC pages.
//!
//! Pages are processed strictly one at a time, so events for one run arrive
//! in page order and never overlap. The trait is still `Send + Sync` so a
//! callback can be shared with other tasks (a UI thread, a channel pump).
//!
//! # Example
//!
//! ```rust
//! use edgequake_bookmarker::{BookmarkConfig, BookmarkProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct EntryCounter {
//!     entries: AtomicUsize,
//! }
//!
//! impl BookmarkProgressCallback for EntryCounter {
//!     fn on_page_complete(&self, page_num: usize, _total: usize, entries: usize) {
//!         self.entries.fetch_add(entries, Ordering::SeqCst);
//!         eprintln!("page {page_num}: {entries} entries");
//!     }
//! }
//!
//! let counter = Arc::new(EntryCounter { entries: AtomicUsize::new(0) });
//! let config = BookmarkConfig::builder()
//!     .progress_callback(counter as Arc<dyn BookmarkProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each TOC page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait BookmarkProgressCallback: Send + Sync {
    /// Called once before the first page is rendered.
    ///
    /// # Arguments
    /// * `total_pages` — number of TOC pages that will be processed
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is rendered and sent to the model.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed physical page number
    /// * `total_pages` — number of TOC pages in the run
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called before a retry of the page's vision call.
    ///
    /// # Arguments
    /// * `attempt`  — upcoming attempt number (2 for the first retry)
    /// * `delay_ms` — back-off wait before the attempt
    fn on_page_retry(&self, page_num: usize, attempt: u32, delay_ms: u64) {
        let _ = (page_num, attempt, delay_ms);
    }

    /// Called when a page yielded a parsed entry list (possibly empty).
    ///
    /// # Arguments
    /// * `entries` — entries kept after parsing and offset normalisation
    fn on_page_complete(&self, page_num: usize, total_pages: usize, entries: usize) {
        let _ = (page_num, total_pages, entries);
    }

    /// Called when a page contributed nothing (extraction or parse failure).
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after reconciliation, before anything is written.
    ///
    /// # Arguments
    /// * `outline_entries` — bookmarks in the final outline
    /// * `warnings`        — validation warnings accumulated during the run
    fn on_run_complete(&self, outline_entries: usize, warnings: usize) {
        let _ = (outline_entries, warnings);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BookmarkProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BookmarkConfig`].
pub type ProgressCallback = Arc<dyn BookmarkProgressCallback>;
