//! Error types for the edgequake-bookmarker library.
//!
//! Three distinct types reflect three distinct failure modes:
//!
//! * [`BookmarkError`] — **Fatal**: the run cannot proceed (bad input file,
//!   a page that cannot be rasterised, endpoint unreachable for every page,
//!   a structurally invalid outline handed to the writer). Returned as
//!   `Err(BookmarkError)` from the top-level entry points. The document is
//!   never modified when one of these is returned.
//!
//! * [`PageError`] — **Non-fatal**: one table-of-contents page contributed
//!   nothing (the model call failed, or its answer could not be parsed).
//!   Stored inside [`crate::output::PageReport`].
//!
//! * [`ValidationWarning`] — entries that were dropped, clamped or repaired
//!   on the way to the outline. Accumulated and handed back as a list,
//!   never raised.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-bookmarker library.
#[derive(Debug, Error)]
pub enum BookmarkError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PDF.
    #[error("Input '{source_name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { source_name: String, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF")]
    WrongPassword,

    /// The configured page range selects no page of the document.
    #[error("Page range {start}-{end} selects no page (document has {total} pages)")]
    EmptyRange {
        start: usize,
        end: usize,
        total: usize,
    },

    /// A page could not be rendered; the run is aborted because every later
    /// entry would be unverifiable.
    #[error("Rasterisation failed for page {page}: {detail}")]
    Rasterization { page: usize, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The vision endpoint failed for a page and the failure policy is `Abort`.
    #[error("Extraction failed for page {page}: {cause}")]
    Extraction { page: usize, cause: ExtractionCause },

    /// Every page of the range failed extraction; the endpoint is most likely
    /// unreachable or misconfigured.
    #[error("All {total} pages failed extraction.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// The configured LLM provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Outline errors ────────────────────────────────────────────────────
    /// Extraction finished but not a single entry survived; the document is
    /// left as it was.
    #[error(
        "No table-of-contents entries were extracted from pages {start}-{end}; the PDF was not modified.\n\
Check the page range and that those pages show the table of contents."
    )]
    EmptyOutline { start: usize, end: usize },

    /// The outline writer refused a structurally invalid entry sequence.
    ///
    /// The reconciler never produces such a sequence, so this indicates a bug.
    #[error("Outline integrity violation at entry {index}: {detail}")]
    IntegrityViolation { index: usize, detail: String },

    /// lopdf failed while editing the document's outline storage.
    #[error("Failed to write outline into PDF: {0}")]
    OutlineWrite(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted settings file could not be read or written.
    #[error("Settings file '{path}': {detail}")]
    Settings { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install pdfium from https://github.com/bblanchon/pdfium-binaries and either\n\
  • place libpdfium next to the binary, or\n\
  • pass --pdfium-lib /path/to/dir (or set PDFIUM_LIB_PATH).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a single vision call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ExtractionCause {
    /// The request did not complete within the per-call timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection, TLS or body-transfer failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The response was 2xx but not a chat-completion envelope.
    #[error("malformed response envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope was well-formed but carried no text.
    #[error("model returned an empty completion")]
    EmptyCompletion,

    /// Error reported by an `edgequake-llm` provider.
    #[error("provider error: {0}")]
    Provider(String),
}

impl ExtractionCause {
    /// Whether repeating the identical request can reasonably succeed.
    ///
    /// Authentication failures and 4xx request errors are permanent and are
    /// surfaced immediately instead of burning the retry budget. Provider
    /// errors only carry a message, so they are classified by its wording.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractionCause::Timeout { .. } | ExtractionCause::Transport(_) => true,
            ExtractionCause::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            ExtractionCause::Provider(message) => !RE_PERMANENT_PROVIDER_ERROR.is_match(message),
            ExtractionCause::MalformedEnvelope(_) | ExtractionCause::EmptyCompletion => false,
        }
    }
}

/// Provider messages that no retry can fix: bad credentials, unknown
/// models, rejected requests.
static RE_PERMANENT_PROVIDER_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(401|403|404|unauthori[sz]ed|forbidden|authentication|invalid[ _-]?api[ _-]?key|api key not|permission denied|model[ _-]?not[ _-]?found|does not exist|not supported|invalid[ _-]?request)\b",
    )
    .unwrap()
});

/// A non-fatal error for a single table-of-contents page.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum PageError {
    /// The vision call failed after all permitted attempts.
    #[error("Page {page}: extraction failed after {attempts} attempt(s): {cause}")]
    Extraction {
        page: usize,
        attempts: u32,
        cause: ExtractionCause,
    },

    /// The model answered, but no entry list could be recovered from it.
    #[error("Page {page}: response could not be parsed as a TOC entry list")]
    Parse { page: usize, raw_text: String },
}

impl PageError {
    /// 1-indexed physical page the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Extraction { page, .. } | PageError::Parse { page, .. } => *page,
        }
    }
}

/// Entries dropped, clamped or repaired on their way into the outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    /// The model could not read a page number; the entry has no target.
    MissingPage { source_page: usize, title: String },

    /// `printed_page + offset` fell outside the document and was clamped.
    Clamped {
        source_page: usize,
        title: String,
        computed: i64,
        clamped_to: usize,
    },

    /// The parser discarded objects without a usable title.
    DroppedEntries { source_page: usize, count: usize },

    /// An entry pointed before its predecessor and was moved forward.
    PageRegression {
        title: String,
        reported: usize,
        raised_to: usize,
    },

    /// The vision call failed and the page was skipped.
    PageSkipped { source_page: usize, reason: String },

    /// The model answered but nothing could be parsed from it.
    ParseFailed { source_page: usize },

    /// The page range ran past the end of the document and was shortened.
    RangeShortened {
        requested_end: usize,
        document_pages: usize,
    },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::MissingPage { source_page, title } => write!(
                f,
                "page {source_page}: '{title}' has no readable page number, dropped"
            ),
            ValidationWarning::Clamped {
                source_page,
                title,
                computed,
                clamped_to,
            } => write!(
                f,
                "page {source_page}: '{title}' points to page {computed}, clamped to {clamped_to}"
            ),
            ValidationWarning::DroppedEntries { source_page, count } => {
                write!(f, "page {source_page}: {count} entries without a title dropped")
            }
            ValidationWarning::PageRegression {
                title,
                reported,
                raised_to,
            } => write!(
                f,
                "'{title}' points to page {reported} before its predecessor, moved to {raised_to}"
            ),
            ValidationWarning::PageSkipped {
                source_page,
                reason,
            } => write!(f, "page {source_page}: skipped ({reason})"),
            ValidationWarning::ParseFailed { source_page } => {
                write!(f, "page {source_page}: response could not be parsed")
            }
            ValidationWarning::RangeShortened {
                requested_end,
                document_pages,
            } => write!(
                f,
                "range ends at page {requested_end} but the document has {document_pages} pages; \
                 stopped at page {document_pages}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rasterization_display() {
        let e = BookmarkError::Rasterization {
            page: 4,
            detail: "bad stream".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 4"), "got: {msg}");
        assert!(msg.contains("bad stream"));
    }

    #[test]
    fn integrity_violation_display() {
        let e = BookmarkError::IntegrityViolation {
            index: 2,
            detail: "level jumps from 1 to 3".into(),
        };
        assert!(e.to_string().contains("entry 2"));
    }

    #[test]
    fn retryable_causes() {
        assert!(ExtractionCause::Timeout { secs: 30 }.is_retryable());
        assert!(ExtractionCause::Transport("reset".into()).is_retryable());
        assert!(ExtractionCause::HttpStatus {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(ExtractionCause::HttpStatus {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!ExtractionCause::HttpStatus {
            status: 401,
            body: "invalid key".into()
        }
        .is_retryable());
        assert!(!ExtractionCause::EmptyCompletion.is_retryable());
    }

    #[test]
    fn provider_errors_are_classified_by_message() {
        let permanent = [
            "Authentication error: invalid API key",
            "API error 401: Unauthorized",
            "model_not_found: The model `gpt-5-vision` does not exist",
            "Invalid request: image_url is not supported by this model",
        ];
        for message in permanent {
            assert!(
                !ExtractionCause::Provider(message.into()).is_retryable(),
                "{message}"
            );
        }

        let transient = [
            "Rate limit exceeded, retry after 20s",
            "API error 503: Service Unavailable",
            "Network error: connection reset by peer",
        ];
        for message in transient {
            assert!(
                ExtractionCause::Provider(message.into()).is_retryable(),
                "{message}"
            );
        }
    }

    #[test]
    fn page_error_reports_page() {
        let e = PageError::Parse {
            page: 7,
            raw_text: "nope".into(),
        };
        assert_eq!(e.page(), 7);
        assert!(e.to_string().starts_with("Page 7"));
    }

    #[test]
    fn warning_serialises_with_kind_tag() {
        let w = ValidationWarning::Clamped {
            source_page: 3,
            title: "Intro".into(),
            computed: -5,
            clamped_to: 1,
        };
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("\"kind\":\"clamped\""), "got: {json}");
        assert!(w.to_string().contains("clamped to 1"));
    }
}
