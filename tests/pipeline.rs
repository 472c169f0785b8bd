//! Integration tests for the bookmarking pipeline.
//!
//! pdfium and the vision endpoint are replaced by scripted in-memory fakes,
//! so these run offline and deterministically. Documents for the writer are
//! built with lopdf directly.

use async_trait::async_trait;
use edgequake_bookmarker::pipeline::write::read_outline;
use edgequake_bookmarker::{
    commit_outline, extract_outline, BookmarkConfig, BookmarkError, BookmarkProgressCallback, ExtractionCause,
    FailurePolicy, LopdfOutlineWriter, OutlineEntry, OutlineWriter, PageError, PageRange,
    RasterError, Rasterizer, RetryPolicy, ValidationWarning, VisionClient,
};
use lopdf::{dictionary, Document, Object};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio_test::{assert_err, assert_ok};

/// Route library logs through the test harness; `RUST_LOG=debug` to see them.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Renders page `i` as the bytes `page-<i+1>`, optionally failing one page.
struct FakeRasterizer {
    pages: usize,
    broken_page: Option<usize>,
}

impl FakeRasterizer {
    fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            broken_page: None,
        })
    }
}

impl Rasterizer for FakeRasterizer {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn render(&self, page_index: usize, _dpi: u32) -> Result<Vec<u8>, RasterError> {
        if page_index >= self.pages {
            return Err(RasterError::OutOfBounds {
                page_index,
                page_count: self.pages,
            });
        }
        if self.broken_page == Some(page_index + 1) {
            return Err(RasterError::Failed {
                page_index,
                detail: "damaged content stream".into(),
            });
        }
        Ok(format!("page-{}", page_index + 1).into_bytes())
    }
}

/// Answers calls in order from a script and records which images it saw.
struct ScriptedClient {
    answers: Mutex<VecDeque<Result<String, ExtractionCause>>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn new(answers: Vec<Result<&str, ExtractionCause>>) -> Self {
        Self {
            answers: Mutex::new(
                answers
                    .into_iter()
                    .map(|a| a.map(str::to_string))
                    .collect(),
            ),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionClient for ScriptedClient {
    async fn extract(&self, image_png: &[u8], _prompt: &str) -> Result<String, ExtractionCause> {
        self.seen
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(image_png).into_owned());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ExtractionCause::EmptyCompletion))
    }
}

#[derive(Default)]
struct Events {
    starts: AtomicUsize,
    retries: AtomicUsize,
    completes: AtomicUsize,
    errors: AtomicUsize,
    finished: AtomicUsize,
}

impl BookmarkProgressCallback for Events {
    fn on_page_start(&self, _page_num: usize, _total: usize) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_retry(&self, _page_num: usize, _attempt: u32, _delay_ms: u64) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page_num: usize, _total: usize, _entries: usize) {
        self.completes.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_error(&self, _page_num: usize, _total: usize, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_run_complete(&self, _outline_entries: usize, _warnings: usize) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn config(start: usize, end: usize, offset: i64) -> BookmarkConfig {
    init_tracing();
    BookmarkConfig::builder()
        .pages(PageRange::new(start, end))
        .page_offset(offset)
        .retry(RetryPolicy {
            max_attempts: 2,
            backoff_ms: 1,
        })
        .build()
        .unwrap()
}

fn blank_document(n: usize) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..n)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => n as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

fn pdf_bytes(pages: usize) -> Arc<[u8]> {
    let mut buf = Vec::new();
    blank_document(pages).save_to(&mut buf).unwrap();
    Arc::from(buf)
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_toc_pages_with_offset_build_a_nested_outline() {
    let client = ScriptedClient::new(vec![
        Ok(r#"[{"title":"Chapter 1","page":1,"level":1}]"#),
        Ok("```json\n[{\"title\":\"Section 1.1\",\"page\":3,\"level\":2}]\n```"),
    ]);
    let report = extract_outline(FakeRasterizer::new(100), &client, &config(1, 2, 14))
        .await
        .unwrap();

    assert_eq!(client.seen(), vec!["page-1", "page-2"]);
    let roots = report.outline.roots();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].title, "Chapter 1");
    assert_eq!(roots[0].physical_page, 15);
    assert_eq!(roots[0].children.len(), 1);
    assert_eq!(roots[0].children[0].title, "Section 1.1");
    assert_eq!(roots[0].children[0].physical_page, 17);
    assert_eq!(roots[0].children[0].level, 2);

    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.stats.processed_pages, 2);
    assert_eq!(report.stats.outline_entries, 2);
    assert!(report.pages.iter().all(|p| p.attempts == 1));
}

#[tokio::test]
async fn reconciled_outline_commits_and_reads_back() {
    let client = ScriptedClient::new(vec![Ok(r#"{"toc": [
        {"title": "Preface", "page": 1, "level": 1},
        {"title": "Background", "page": 2, "level": 3},
        {"title": "Scope", "page": 2, "level": 2},
        {"title": "Part I", "page": 4, "level": 1}
    ]}"#)]);
    let report = extract_outline(FakeRasterizer::new(20), &client, &config(1, 1, 2))
        .await
        .unwrap();

    let levels: Vec<u32> = report.outline.entries().iter().map(|e| e.level).collect();
    assert_eq!(levels, vec![1, 2, 2, 1]);

    let mut writer = LopdfOutlineWriter::from_document(blank_document(20)).unwrap();
    assert_ok!(writer.commit(report.outline.entries()));
    let bytes = assert_ok!(writer.to_bytes());

    let reloaded = Document::load_mem(&bytes).unwrap();
    assert_eq!(read_outline(&reloaded).unwrap(), report.outline.entries());
}

#[tokio::test]
async fn failed_page_is_skipped_with_a_warning() {
    let client = ScriptedClient::new(vec![
        Ok(r#"[{"title":"Intro","page":1,"level":1}]"#),
        Err(ExtractionCause::HttpStatus {
            status: 401,
            body: "invalid api key".into(),
        }),
        Ok(r#"[{"title":"Appendix","page":90,"level":1}]"#),
    ]);
    let events = Arc::new(Events::default());
    let mut cfg = config(3, 5, 0);
    cfg.progress_callback = Some(events.clone());

    let report = extract_outline(FakeRasterizer::new(100), &client, &cfg)
        .await
        .unwrap();

    let titles: Vec<&str> = report
        .outline
        .entries()
        .iter()
        .map(|e| e.title.as_str())
        .collect();
    assert_eq!(titles, vec!["Intro", "Appendix"]);

    let failed = &report.pages[1];
    assert_eq!(failed.page_num, 4);
    assert_eq!(failed.attempts, 1, "401 must not be retried");
    assert!(matches!(
        failed.error,
        Some(PageError::Extraction { page: 4, .. })
    ));
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, ValidationWarning::PageSkipped { source_page: 4, .. })));

    assert_eq!(events.starts.load(Ordering::SeqCst), 3);
    assert_eq!(events.completes.load(Ordering::SeqCst), 2);
    assert_eq!(events.errors.load(Ordering::SeqCst), 1);
    assert_eq!(events.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn abort_policy_stops_the_run() {
    let client = ScriptedClient::new(vec![
        Ok(r#"[{"title":"Intro","page":1,"level":1}]"#),
        Err(ExtractionCause::Transport("connection refused".into())),
        Err(ExtractionCause::Transport("connection refused".into())),
    ]);
    let mut cfg = config(1, 3, 0);
    cfg.on_extraction_failure = FailurePolicy::Abort;

    let err = extract_outline(FakeRasterizer::new(10), &client, &cfg)
        .await
        .unwrap_err();
    match err {
        BookmarkError::Extraction { page, cause } => {
            assert_eq!(page, 2);
            assert_eq!(cause, ExtractionCause::Transport("connection refused".into()));
        }
        other => panic!("expected extraction error, got {other}"),
    }
    // Page 3 is never rendered or sent.
    assert_eq!(client.seen(), vec!["page-1", "page-2", "page-2"]);
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let client = ScriptedClient::new(vec![
        Err(ExtractionCause::HttpStatus {
            status: 429,
            body: "slow down".into(),
        }),
        Ok(r#"[{"title":"Intro","page":1,"level":1}]"#),
    ]);
    let events = Arc::new(Events::default());
    let mut cfg = config(1, 1, 0);
    cfg.progress_callback = Some(events.clone());

    let report = extract_outline(FakeRasterizer::new(10), &client, &cfg)
        .await
        .unwrap();
    assert_eq!(report.pages[0].attempts, 2);
    assert!(report.pages[0].is_ok());
    assert_eq!(events.retries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_endpoint_fails_the_whole_run() {
    let client = ScriptedClient::new(vec![
        Err(ExtractionCause::Timeout { secs: 30 }),
        Err(ExtractionCause::Timeout { secs: 30 }),
        Err(ExtractionCause::Timeout { secs: 30 }),
        Err(ExtractionCause::Timeout { secs: 30 }),
    ]);
    let err = extract_outline(FakeRasterizer::new(10), &client, &config(1, 2, 0))
        .await
        .unwrap_err();
    match err {
        BookmarkError::AllPagesFailed { total, first_error } => {
            assert_eq!(total, 2);
            assert!(first_error.contains("timed out"), "{first_error}");
        }
        other => panic!("expected AllPagesFailed, got {other}"),
    }
}

#[tokio::test]
async fn unparseable_page_contributes_nothing() {
    let client = ScriptedClient::new(vec![
        Ok("I'm sorry, I cannot read this image."),
        Ok(r#"Here you go: [{"title":"Methods","page":"12","level":1}] Hope it helps!"#),
    ]);
    let report = extract_outline(FakeRasterizer::new(50), &client, &config(1, 2, 0))
        .await
        .unwrap();

    assert!(matches!(
        report.pages[0].error,
        Some(PageError::Parse { page: 1, .. })
    ));
    assert!(report.pages[1].recovered);
    assert_eq!(
        report.outline.entries(),
        &[OutlineEntry {
            title: "Methods".into(),
            physical_page: 12,
            level: 1,
        }]
    );
    assert!(report
        .warnings
        .contains(&ValidationWarning::ParseFailed { source_page: 1 }));
}

#[tokio::test]
async fn out_of_range_pages_are_clamped_not_dropped() {
    let client = ScriptedClient::new(vec![Ok(
        r#"[{"title":"Front","page":5,"level":1},{"title":"Index","page":null,"level":1}]"#,
    )]);
    let report = extract_outline(FakeRasterizer::new(100), &client, &config(1, 1, -10))
        .await
        .unwrap();

    assert_eq!(report.outline.len(), 1);
    assert_eq!(report.outline.entries()[0].physical_page, 1);
    assert!(report.warnings.contains(&ValidationWarning::Clamped {
        source_page: 1,
        title: "Front".into(),
        computed: -5,
        clamped_to: 1,
    }));
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, ValidationWarning::MissingPage { title, .. } if title == "Index")));
}

#[tokio::test]
async fn rasterization_failure_aborts_before_extraction() {
    let rasterizer = Arc::new(FakeRasterizer {
        pages: 10,
        broken_page: Some(2),
    });
    let client = ScriptedClient::new(vec![
        Ok(r#"[{"title":"Intro","page":1,"level":1}]"#),
        Ok("[]"),
    ]);
    let err = assert_err!(extract_outline(rasterizer, &client, &config(1, 3, 0)).await);
    assert!(matches!(err, BookmarkError::Rasterization { page: 2, .. }));
    assert_eq!(client.seen(), vec!["page-1"]);
}

#[tokio::test]
async fn range_past_the_last_page_is_shortened_with_a_warning() {
    let client = ScriptedClient::new(vec![
        Ok(r#"[{"title":"Intro","page":1,"level":1}]"#),
        Ok("[]"),
    ]);
    let report = extract_outline(FakeRasterizer::new(6), &client, &config(5, 10, 0))
        .await
        .unwrap();

    assert_eq!(client.seen(), vec!["page-5", "page-6"]);
    assert_eq!(report.pages.len(), 2);
    assert!(report.warnings.contains(&ValidationWarning::RangeShortened {
        requested_end: 10,
        document_pages: 6,
    }));
}

#[tokio::test]
async fn range_outside_document_is_rejected() {
    let client = ScriptedClient::new(vec![]);
    let err = extract_outline(FakeRasterizer::new(10), &client, &config(50, 60, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BookmarkError::EmptyRange {
            start: 50,
            end: 60,
            total: 10
        }
    ));
    assert!(client.seen().is_empty());
}

#[test]
fn writer_rejects_what_the_reconciler_would_never_emit() {
    let mut writer = LopdfOutlineWriter::from_document(blank_document(5)).unwrap();
    let bad = vec![
        OutlineEntry {
            title: "A".into(),
            physical_page: 1,
            level: 1,
        },
        OutlineEntry {
            title: "B".into(),
            physical_page: 2,
            level: 3,
        },
    ];
    assert!(matches!(
        writer.commit(&bad),
        Err(BookmarkError::IntegrityViolation { index: 1, .. })
    ));
}

// ── Commit ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn commit_outline_writes_reconciled_entries() {
    let input = pdf_bytes(30);
    let client = ScriptedClient::new(vec![
        Ok(r#"[{"title":"Chapter 1","page":1,"level":1}]"#),
        Ok(r#"[{"title":"Section 1.1","page":3,"level":2}]"#),
    ]);
    let rasterizer = FakeRasterizer::new(30);
    let out = commit_outline(Arc::clone(&input), rasterizer, &client, &config(1, 2, 4))
        .await
        .unwrap();

    let written = read_outline(&Document::load_mem(&out.pdf).unwrap()).unwrap();
    assert_eq!(written, out.report.outline.entries());
    assert_eq!(written[0].physical_page, 5);
    assert_eq!(written[1].physical_page, 7);
    assert!(read_outline(&Document::load_mem(&input).unwrap())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn empty_outline_is_refused() {
    let client = ScriptedClient::new(vec![Ok("[]"), Ok("```json\n[]\n```")]);
    let err = commit_outline(pdf_bytes(10), FakeRasterizer::new(10), &client, &config(1, 2, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, BookmarkError::EmptyOutline { start: 1, end: 2 }));
    assert_eq!(client.seen(), vec!["page-1", "page-2"]);
}

#[tokio::test]
async fn abort_mid_run_leaves_input_untouched() {
    let input = pdf_bytes(10);
    let original = input.to_vec();
    let client = ScriptedClient::new(vec![
        Ok(r#"[{"title":"Intro","page":1,"level":1}]"#),
        Err(ExtractionCause::HttpStatus {
            status: 403,
            body: "forbidden".into(),
        }),
    ]);
    let mut cfg = config(1, 3, 0);
    cfg.on_extraction_failure = FailurePolicy::Abort;

    let err = assert_err!(
        commit_outline(Arc::clone(&input), FakeRasterizer::new(10), &client, &cfg).await
    );
    assert!(matches!(err, BookmarkError::Extraction { page: 2, .. }));
    assert_eq!(&input[..], &original[..]);
    assert!(read_outline(&Document::load_mem(&input).unwrap())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unwritable_document_fails_before_any_request() {
    let client = ScriptedClient::new(vec![Ok(r#"[{"title":"Intro","page":1,"level":1}]"#)]);
    let garbage: Arc<[u8]> = Arc::from(&b"%PDF-1.7\nthis is not a pdf body"[..]);

    let err = commit_outline(garbage, FakeRasterizer::new(10), &client, &config(1, 1, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, BookmarkError::CorruptPdf { .. }), "{err}");
    assert!(client.seen().is_empty());
}

#[tokio::test]
async fn page_count_disagreement_fails_before_any_request() {
    let client = ScriptedClient::new(vec![Ok(r#"[{"title":"Intro","page":1,"level":1}]"#)]);
    let err = commit_outline(pdf_bytes(5), FakeRasterizer::new(6), &client, &config(1, 1, 0))
        .await
        .unwrap_err();
    match err {
        BookmarkError::CorruptPdf { detail } => assert!(detail.contains("5 pages"), "{detail}"),
        other => panic!("expected CorruptPdf, got {other}"),
    }
    assert!(client.seen().is_empty());
}
