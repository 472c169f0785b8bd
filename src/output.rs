//! Result types returned by the bookmarking entry points.
//!
//! Everything here is `Serialize` so the CLI can emit a run report with
//! `--json` and library callers can log or persist it verbatim.

use crate::error::{PageError, ValidationWarning};
use crate::pipeline::reconcile::Outline;
use serde::Serialize;

/// What one table-of-contents page contributed.
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    /// 1-indexed physical page number.
    pub page_num: usize,
    /// Entries kept after parsing and offset normalisation.
    pub entries: usize,
    /// Vision calls made for this page (0 when rendering never got that far).
    pub attempts: u32,
    /// The answer was only decodable after bracket-slice recovery.
    pub recovered: bool,
    /// Set when the page contributed nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
}

impl PageReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    /// Pages in the document.
    pub document_pages: usize,
    /// TOC pages that yielded a parsed entry list.
    pub processed_pages: usize,
    /// TOC pages that contributed nothing.
    pub failed_pages: usize,
    /// Candidates produced by the parser across all pages.
    pub entries_extracted: usize,
    /// Bookmarks in the reconciled outline.
    pub outline_entries: usize,
    pub render_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a run produced besides the document itself.
#[derive(Debug, Clone, Serialize)]
pub struct BookmarkReport {
    pub outline: Outline,
    pub warnings: Vec<ValidationWarning>,
    pub pages: Vec<PageReport>,
    pub stats: RunStats,
}

impl BookmarkReport {
    /// Pages whose extraction or parse failed.
    pub fn failed_pages(&self) -> impl Iterator<Item = &PageReport> {
        self.pages.iter().filter(|p| !p.is_ok())
    }
}

/// A bookmarked document held in memory.
#[derive(Debug, Clone)]
pub struct BookmarkedPdf {
    /// The rewritten PDF.
    pub pdf: Vec<u8>,
    pub report: BookmarkReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::NormalizedEntry;
    use crate::pipeline::reconcile::reconcile;

    #[test]
    fn report_serialises_outline_as_flat_list() {
        let (outline, warnings) = reconcile(vec![vec![NormalizedEntry {
            title: "Chapter 1".into(),
            physical_page: 15,
            level: 1,
            source_page: 1,
        }]]);
        let report = BookmarkReport {
            outline,
            warnings,
            pages: vec![PageReport {
                page_num: 1,
                entries: 1,
                attempts: 1,
                recovered: false,
                error: None,
            }],
            stats: RunStats::default(),
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outline"][0]["title"], "Chapter 1");
        assert_eq!(json["outline"][0]["physical_page"], 15);
        assert_eq!(json["outline"][0]["level"], 1);
        assert!(json["pages"][0].get("error").is_none());
        assert_eq!(report.failed_pages().count(), 0);
    }
}
