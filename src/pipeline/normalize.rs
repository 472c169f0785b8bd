//! Offset normalisation: printed page numbers → physical page numbers.
//!
//! `physical_page = printed_page + offset`, clamped into `[1, page_count]`.
//! An out-of-range result is far more often a slightly wrong offset than a
//! bogus entry, so it is clamped and reported rather than dropped. Entries
//! without a printed page have no target at all and are dropped.

use crate::error::ValidationWarning;
use crate::pipeline::parse::TocCandidate;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A candidate whose target page is known and lies inside the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEntry {
    pub title: String,
    /// 1-indexed page within the document, in `[1, page_count]`.
    pub physical_page: usize,
    /// Level as reported by the model; repaired later by the reconciler.
    pub level: u32,
    /// 1-indexed physical page of the TOC image this entry was read from.
    pub source_page: usize,
}

/// Map `candidates` read from TOC page `source_page` onto physical pages.
///
/// Warnings are appended to `warnings`; the function never fails.
pub fn normalize(
    candidates: Vec<TocCandidate>,
    offset: i64,
    page_count: usize,
    source_page: usize,
    warnings: &mut Vec<ValidationWarning>,
) -> Vec<NormalizedEntry> {
    let upper = page_count.max(1) as i64;
    let mut entries = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let Some(printed) = candidate.printed_page else {
            warn!(
                "Page {}: '{}' has no page number, dropping",
                source_page, candidate.title
            );
            warnings.push(ValidationWarning::MissingPage {
                source_page,
                title: candidate.title,
            });
            continue;
        };

        let computed = printed.saturating_add(offset);
        let clamped = computed.clamp(1, upper);
        if clamped != computed {
            warn!(
                "Page {}: '{}' → page {} is outside 1..={}, clamped to {}",
                source_page, candidate.title, computed, upper, clamped
            );
            warnings.push(ValidationWarning::Clamped {
                source_page,
                title: candidate.title.clone(),
                computed,
                clamped_to: clamped as usize,
            });
        }

        entries.push(NormalizedEntry {
            title: candidate.title,
            physical_page: clamped as usize,
            level: candidate.level,
            source_page,
        });
    }

    entries
}
