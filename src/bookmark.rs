//! Bookmarking entry points: TOC pages in, outlined PDF out.
//!
//! Pages are processed strictly one at a time in ascending order. The
//! reconciler depends on that order, and providers rate-limit per account,
//! so a single in-flight request keeps backpressure trivial.
//!
//! The document is mutated at most once, after every page of the range has
//! been reconciled. Dropping the returned future at any earlier point leaves
//! the input untouched and writes nothing.

use crate::config::{BookmarkConfig, FailurePolicy};
use crate::error::{BookmarkError, ExtractionCause, PageError, ValidationWarning};
use crate::output::{BookmarkReport, BookmarkedPdf, PageReport, RunStats};
use crate::pipeline::input::{self, SourcePdf};
use crate::pipeline::normalize::normalize;
use crate::pipeline::parse::{self, ParsedEntries};
use crate::pipeline::reconcile::Reconciler;
use crate::pipeline::render::{self, PdfiumRasterizer, Rasterizer};
use crate::pipeline::vision::{OpenAiCompatibleClient, ProviderClient, VisionClient};
use crate::pipeline::write::{self, LopdfOutlineWriter, OutlineWriter};
use crate::prompts;
use edgequake_llm::ProviderFactory;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Run the per-page pipeline over `config.pages` and reconcile the result.
///
/// This is the core of every other entry point; it never touches the
/// document's outline. Use it directly to plug in a custom [`Rasterizer`]
/// or [`VisionClient`].
///
/// # Errors
/// - [`BookmarkError::EmptyRange`] when the range selects no page
/// - [`BookmarkError::Rasterization`] when any page fails to render
/// - [`BookmarkError::Extraction`] when a page fails and the policy is
///   [`FailurePolicy::Abort`]
/// - [`BookmarkError::AllPagesFailed`] when no page got an answer at all
pub async fn extract_outline(
    rasterizer: Arc<dyn Rasterizer>,
    client: &dyn VisionClient,
    config: &BookmarkConfig,
) -> Result<BookmarkReport, BookmarkError> {
    let run_start = Instant::now();
    let document_pages = rasterizer.page_count();
    let indices = config.pages.to_indices(document_pages);
    if indices.is_empty() {
        return Err(BookmarkError::EmptyRange {
            start: config.pages.start,
            end: config.pages.end,
            total: document_pages,
        });
    }

    let total = indices.len();
    let system_prompt = prompts::system_prompt(config.system_prompt.as_deref());
    info!(
        "Extracting TOC from pages {}-{} of {} (offset {:+})",
        indices[0] + 1,
        indices[total - 1] + 1,
        document_pages,
        config.page_offset
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total);
    }

    let mut reconciler = Reconciler::new();
    let mut warnings: Vec<ValidationWarning> = Vec::new();
    if config.pages.end > document_pages {
        warn!(
            "Page range {}-{} runs past the last page; stopping at page {}",
            config.pages.start, config.pages.end, document_pages
        );
        warnings.push(ValidationWarning::RangeShortened {
            requested_end: config.pages.end,
            document_pages,
        });
    }
    let mut pages: Vec<PageReport> = Vec::with_capacity(total);
    let mut stats = RunStats {
        document_pages,
        ..RunStats::default()
    };

    for page_index in indices {
        let page_num = page_index + 1;
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page_num, total);
        }

        // ── Render ───────────────────────────────────────────────────────
        let render_start = Instant::now();
        let png = render_page(Arc::clone(&rasterizer), page_index, config.model.dpi).await?;
        stats.render_duration_ms += render_start.elapsed().as_millis() as u64;

        // ── Extract ──────────────────────────────────────────────────────
        let llm_start = Instant::now();
        let (answer, attempts) =
            extract_with_retry(client, &png, system_prompt, page_num, config).await;
        stats.llm_duration_ms += llm_start.elapsed().as_millis() as u64;

        let raw_text = match answer {
            Ok(text) => text,
            Err(cause) => {
                if config.on_extraction_failure == FailurePolicy::Abort {
                    return Err(BookmarkError::Extraction {
                        page: page_num,
                        cause,
                    });
                }
                warn!("Page {}: skipped after {} attempt(s): {}", page_num, attempts, cause);
                let error = PageError::Extraction {
                    page: page_num,
                    attempts,
                    cause: cause.clone(),
                };
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_error(page_num, total, &error.to_string());
                }
                warnings.push(ValidationWarning::PageSkipped {
                    source_page: page_num,
                    reason: cause.to_string(),
                });
                pages.push(PageReport {
                    page_num,
                    entries: 0,
                    attempts,
                    recovered: false,
                    error: Some(error),
                });
                continue;
            }
        };

        // ── Parse ────────────────────────────────────────────────────────
        let decoded = match parse::parse(&raw_text) {
            Ok(decoded) => decoded,
            Err(failure) => {
                warn!("Page {}: response could not be parsed", page_num);
                debug!("Page {} raw response: {}", page_num, failure.raw_text);
                let error = PageError::Parse {
                    page: page_num,
                    raw_text: failure.raw_text,
                };
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_error(page_num, total, &error.to_string());
                }
                warnings.push(ValidationWarning::ParseFailed {
                    source_page: page_num,
                });
                pages.push(PageReport {
                    page_num,
                    entries: 0,
                    attempts,
                    recovered: false,
                    error: Some(error),
                });
                continue;
            }
        };
        let recovered = decoded.is_recovered();
        let ParsedEntries {
            candidates,
            dropped,
        } = decoded.into_entries();
        if dropped > 0 {
            warnings.push(ValidationWarning::DroppedEntries {
                source_page: page_num,
                count: dropped,
            });
        }
        stats.entries_extracted += candidates.len();

        // ── Normalise & accumulate ───────────────────────────────────────
        let entries = normalize(
            candidates,
            config.page_offset,
            document_pages,
            page_num,
            &mut warnings,
        );
        let kept = entries.len();
        reconciler.push_page(entries);

        debug!("Page {}: {} entries{}", page_num, kept, if recovered { " (recovered)" } else { "" });
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_complete(page_num, total, kept);
        }
        pages.push(PageReport {
            page_num,
            entries: kept,
            attempts,
            recovered,
            error: None,
        });
    }

    // A run where the endpoint never answered says nothing about the TOC.
    let unanswered = pages
        .iter()
        .filter(|p| matches!(p.error, Some(PageError::Extraction { .. })))
        .count();
    if unanswered == pages.len() {
        let first_error = pages
            .iter()
            .find_map(|p| p.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(BookmarkError::AllPagesFailed {
            total: pages.len(),
            first_error,
        });
    }

    // ── Reconcile ────────────────────────────────────────────────────────
    let (outline, repairs) = reconciler.finish();
    warnings.extend(repairs);

    stats.processed_pages = pages.iter().filter(|p| p.is_ok()).count();
    stats.failed_pages = pages.len() - stats.processed_pages;
    stats.outline_entries = outline.len();
    stats.total_duration_ms = run_start.elapsed().as_millis() as u64;

    info!(
        "Outline reconciled: {} bookmarks from {}/{} pages, {} warnings",
        outline.len(),
        stats.processed_pages,
        total,
        warnings.len()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(outline.len(), warnings.len());
    }

    Ok(BookmarkReport {
        outline,
        warnings,
        pages,
        stats,
    })
}

/// Extract the outline from `pdf_bytes` and commit it into a copy of the
/// document, with a caller-supplied [`Rasterizer`] and [`VisionClient`].
///
/// The document is parsed for editing before the first vision call, so a
/// file that cannot be rewritten fails without spending any request. The
/// copy is mutated once, after reconciliation; on any error nothing is
/// returned and `pdf_bytes` is never touched.
///
/// # Errors
/// Everything [`extract_outline`] returns, plus
/// - [`BookmarkError::CorruptPdf`] when lopdf cannot parse the document or
///   counts a different number of pages than the rasterizer
/// - [`BookmarkError::OutlineWrite`] for encrypted documents
/// - [`BookmarkError::EmptyOutline`] when no entry survived
pub async fn commit_outline(
    pdf_bytes: Arc<[u8]>,
    rasterizer: Arc<dyn Rasterizer>,
    client: &dyn VisionClient,
    config: &BookmarkConfig,
) -> Result<BookmarkedPdf, BookmarkError> {
    let run_start = Instant::now();

    let mut writer =
        tokio::task::spawn_blocking(move || LopdfOutlineWriter::from_bytes(&pdf_bytes))
            .await
            .map_err(|e| BookmarkError::Internal(format!("spawn_blocking join error: {e}")))??;
    if writer.page_count() != rasterizer.page_count() {
        return Err(BookmarkError::CorruptPdf {
            detail: format!(
                "page tree lists {} pages but the renderer sees {}",
                writer.page_count(),
                rasterizer.page_count()
            ),
        });
    }

    let mut report = extract_outline(rasterizer, client, config).await?;
    if report.outline.is_empty() {
        return Err(BookmarkError::EmptyOutline {
            start: config.pages.start,
            end: config.pages.end,
        });
    }

    // Single mutation point: everything above is read-only.
    let entries = report.outline.entries().to_vec();
    let pdf = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, BookmarkError> {
        writer.commit(&entries)?;
        writer.to_bytes()
    })
    .await
    .map_err(|e| BookmarkError::Internal(format!("spawn_blocking join error: {e}")))??;

    report.stats.total_duration_ms = run_start.elapsed().as_millis() as u64;
    Ok(BookmarkedPdf { pdf, report })
}

/// Bookmark an in-memory PDF and return the rewritten bytes.
///
/// # Example
/// ```rust,no_run
/// use edgequake_bookmarker::{bookmark_bytes, BookmarkConfig, PageRange};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("book.pdf")?;
/// let config = BookmarkConfig::builder()
///     .api_key(std::env::var("OPENAI_API_KEY")?)
///     .base_url("https://api.openai.com/v1")
///     .model_name("gpt-4o")
///     .pages(PageRange::new(5, 7))
///     .page_offset(14)
///     .build()?;
/// let out = bookmark_bytes(&bytes, &config).await?;
/// std::fs::write("book_bookmarked.pdf", &out.pdf)?;
/// # Ok(())
/// # }
/// ```
pub async fn bookmark_bytes(
    pdf_bytes: &[u8],
    config: &BookmarkConfig,
) -> Result<BookmarkedPdf, BookmarkError> {
    let source = SourcePdf::from_bytes("<memory>", pdf_bytes.to_vec())?;
    run(source, config).await
}

/// Bookmark a local file or HTTP(S) URL and write the result to
/// `output_path` atomically.
pub async fn bookmark_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &BookmarkConfig,
) -> Result<BookmarkReport, BookmarkError> {
    let source = input::load_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let BookmarkedPdf { pdf, report } = run(source, config).await?;

    let path = output_path.as_ref().to_path_buf();
    let written = path.clone();
    tokio::task::spawn_blocking(move || write::write_atomic(&path, &pdf))
        .await
        .map_err(|e| BookmarkError::Internal(format!("spawn_blocking join error: {e}")))??;
    info!("Wrote {}", written.display());
    Ok(report)
}

/// Synchronous wrapper around [`bookmark_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn bookmark_file_sync(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &BookmarkConfig,
) -> Result<BookmarkReport, BookmarkError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| BookmarkError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(bookmark_file(input_str, output_path, config))
}

/// Extract and reconcile the outline without writing anything.
pub async fn preview(
    input_str: impl AsRef<str>,
    config: &BookmarkConfig,
) -> Result<BookmarkReport, BookmarkError> {
    let source = input::load_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let bytes: Arc<[u8]> = Arc::from(source.bytes);
    let rasterizer = open_rasterizer(Arc::clone(&bytes), config).await?;
    let client = vision_client(config)?;
    extract_outline(rasterizer, client.as_ref(), config).await
}

/// Build the [`VisionClient`] a config asks for, from most to least specific:
///
/// 1. a pre-built `edgequake-llm` provider (`config.provider`);
/// 2. a named provider (`config.provider_name`), created by
///    [`ProviderFactory::create_llm_provider`] with `config.model.model`,
///    which reads that provider's API key from the environment;
/// 3. the OpenAI-compatible endpoint in `config.model`.
pub fn vision_client(config: &BookmarkConfig) -> Result<Box<dyn VisionClient>, BookmarkError> {
    if let Some(ref provider) = config.provider {
        return Ok(Box::new(ProviderClient::new(
            Arc::clone(provider),
            &config.model,
            config.api_timeout_secs,
        )));
    }

    if let Some(ref name) = config.provider_name {
        let provider = ProviderFactory::create_llm_provider(name, &config.model.model).map_err(
            |e| BookmarkError::ProviderNotConfigured {
                provider: name.clone(),
                hint: format!("{e}"),
            },
        )?;
        return Ok(Box::new(ProviderClient::new(
            provider,
            &config.model,
            config.api_timeout_secs,
        )));
    }

    if config.model.base_url.trim().is_empty() {
        return Err(BookmarkError::ProviderNotConfigured {
            provider: "openai-compatible".to_string(),
            hint: "No endpoint configured. Pass --base-url or set PDF_BOOKMARK_BASE_URL.".into(),
        });
    }
    let client = OpenAiCompatibleClient::new(&config.model, config.api_timeout_secs).map_err(
        |e| BookmarkError::ProviderNotConfigured {
            provider: "openai-compatible".to_string(),
            hint: e.to_string(),
        },
    )?;
    debug!("Using OpenAI-compatible endpoint {}", client.endpoint());
    Ok(Box::new(client))
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn run(source: SourcePdf, config: &BookmarkConfig) -> Result<BookmarkedPdf, BookmarkError> {
    let bytes: Arc<[u8]> = Arc::from(source.bytes);
    let rasterizer = open_rasterizer(Arc::clone(&bytes), config).await?;
    let client = vision_client(config)?;
    let out = commit_outline(bytes, rasterizer, client.as_ref(), config).await?;

    info!(
        "Bookmarked '{}': {} bookmarks, {}ms total",
        source.name,
        out.report.outline.len(),
        out.report.stats.total_duration_ms
    );
    Ok(out)
}

/// Bind pdfium and open the document off the async threads.
async fn open_rasterizer(
    bytes: Arc<[u8]>,
    config: &BookmarkConfig,
) -> Result<Arc<dyn Rasterizer>, BookmarkError> {
    let library_dir = config.pdfium_library_path.clone();
    let password = config.password.clone();
    let max_pixels = config.max_rendered_pixels;

    let rasterizer = tokio::task::spawn_blocking(move || {
        let pdfium = render::bind_pdfium(library_dir.as_deref())?;
        PdfiumRasterizer::open(pdfium, bytes, password, max_pixels)
    })
    .await
    .map_err(|e| BookmarkError::Internal(format!("spawn_blocking join error: {e}")))??;

    Ok(Arc::new(rasterizer))
}

async fn render_page(
    rasterizer: Arc<dyn Rasterizer>,
    page_index: usize,
    dpi: u32,
) -> Result<Vec<u8>, BookmarkError> {
    tokio::task::spawn_blocking(move || rasterizer.render(page_index, dpi))
        .await
        .map_err(|e| BookmarkError::Internal(format!("spawn_blocking join error: {e}")))?
        .map_err(|e| BookmarkError::Rasterization {
            page: page_index + 1,
            detail: e.to_string(),
        })
}

/// Call the vision endpoint until it answers, the cause is permanent, or the
/// attempt budget is spent. Returns the outcome and the attempts made.
async fn extract_with_retry(
    client: &dyn VisionClient,
    png: &[u8],
    system_prompt: &str,
    page_num: usize,
    config: &BookmarkConfig,
) -> (Result<String, ExtractionCause>, u32) {
    let max_attempts = config.retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match client.extract(png, system_prompt).await {
            Ok(text) => return (Ok(text), attempt),
            Err(cause) if !cause.is_retryable() || attempt >= max_attempts => {
                return (Err(cause), attempt);
            }
            Err(cause) => {
                attempt += 1;
                let delay_ms = config.retry.delay_before(attempt);
                warn!(
                    "Page {}: {} (attempt {}/{}), retrying in {}ms",
                    page_num,
                    cause,
                    attempt - 1,
                    max_attempts,
                    delay_ms
                );
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_retry(page_num, attempt, delay_ms);
                }
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}
