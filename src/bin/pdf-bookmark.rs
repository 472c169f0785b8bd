//! CLI binary for edgequake-bookmarker.
//!
//! A thin shim over the library crate: merges flags with the saved settings
//! file, maps them to `BookmarkConfig` and prints the outline and warnings.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_bookmarker::pipeline::input::is_url;
use edgequake_bookmarker::{
    bookmark_file, preview, settings, BookmarkConfig, BookmarkProgressCallback, BookmarkReport,
    FailurePolicy, ModelConfig, PageRange, ProgressCallback, RetryPolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per TOC page.
struct CliProgressCallback {
    bar: ProgressBar,
    page_started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.page_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BookmarkProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} TOC pages  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix("Reading");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {total_pages} TOC pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut t) = self.page_started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_retry(&self, page_num: usize, attempt: u32, delay_ms: u64) {
        self.bar.println(format!(
            "  {} Page {:>3}  retry {} in {}ms",
            yellow("↻"),
            page_num,
            attempt,
            delay_ms
        ));
    }

    fn on_page_complete(&self, page_num: usize, _total: usize, entries: usize) {
        let secs = self.elapsed_secs();
        self.bar.println(format!(
            "  {} Page {:>3}  {:<12}  {}",
            green("✓"),
            page_num,
            dim(&format!("{entries:>3} entries")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, _total: usize, error: &str) {
        let secs = self.elapsed_secs();
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {}  {}",
            red("✗"),
            page_num,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, outline_entries: usize, warnings: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {} bookmarks reconciled  ({} warnings, {} pages failed)",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&outline_entries.to_string()),
            warnings,
            failed,
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # TOC on physical pages 5-7; printed page 1 is physical page 15
  pdf-bookmark book.pdf --start 5 --end 7 --offset 14

  # Preview the outline without writing anything
  pdf-bookmark book.pdf --start 5 --end 7 --offset 14 --dry-run

  # Machine-readable report
  pdf-bookmark book.pdf --start 3 --end 4 --json > report.json

  # Local OpenAI-compatible server (LM Studio, Ollama /v1, vLLM)
  pdf-bookmark book.pdf --base-url http://localhost:1234/v1 --model qwen2.5-vl

  # Provider with its own wire format, via edgequake-llm
  pdf-bookmark book.pdf --provider anthropic --model claude-sonnet-4-20250514

  # Remember endpoint and key for later runs
  pdf-bookmark --base-url https://api.openai.com/v1 --api-key sk-... --model gpt-4o --save-config

FINDING THE OFFSET:
  offset = physical page of printed page N  -  N
  e.g. printed page 1 is the 15th page of the file → --offset 14.
  Entries pushed outside the document are clamped and reported as warnings.

ENVIRONMENT VARIABLES:
  PDF_BOOKMARK_BASE_URL   OpenAI-compatible endpoint (default https://api.deepseek.com)
  PDF_BOOKMARK_API_KEY    Credential for that endpoint
  PDF_BOOKMARK_MODEL      Model name (default deepseek-chat)
  EDGEQUAKE_PROVIDER      Use an edgequake-llm provider instead (openai, anthropic, gemini, …)
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Override log filtering (e.g. RUST_LOG=edgequake_bookmarker=debug)
"#;

/// Add a bookmark outline to a PDF by reading its printed table of contents
/// with a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-bookmark",
    version,
    about = "Add bookmarks to a PDF from its printed table of contents using a vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    #[arg(required_unless_present_any = ["save_config", "clear_config"])]
    input: Option<String>,

    /// Output PDF (default: bookmarked_<name> next to the input).
    #[arg(short, long, env = "PDF_BOOKMARK_OUTPUT")]
    output: Option<PathBuf>,

    /// First physical page of the TOC (1-indexed).
    #[arg(long, default_value_t = 1)]
    start: usize,

    /// Last physical page of the TOC (inclusive).
    #[arg(long, default_value_t = 10)]
    end: usize,

    /// Physical page minus printed page number.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    offset: i64,

    /// OpenAI-compatible base URL.
    #[arg(long, env = "PDF_BOOKMARK_BASE_URL")]
    base_url: Option<String>,

    /// API key for the endpoint.
    #[arg(long, env = "PDF_BOOKMARK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Vision model name.
    #[arg(long, env = "PDF_BOOKMARK_MODEL")]
    model: Option<String>,

    /// Use an edgequake-llm provider (openai, anthropic, gemini, azure, ollama).
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: Option<u32>,

    /// Max completion tokens per page.
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long)]
    temperature: Option<f32>,

    /// Request `response_format: json_object` from the endpoint.
    #[arg(long)]
    json_mode: bool,

    /// Vision calls per page, including the first.
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Wait before the first retry; doubles on each further retry.
    #[arg(long, default_value_t = 500)]
    backoff_ms: u64,

    /// Per-call timeout in seconds.
    #[arg(long, default_value_t = 30)]
    api_timeout: u64,

    /// Timeout in seconds when the input is a URL.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,

    /// What to do when a page's vision call keeps failing.
    #[arg(long, value_enum, default_value = "skip")]
    on_failure: OnFailureArg,

    /// Text file with a replacement system prompt.
    #[arg(long)]
    system_prompt: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF_BOOKMARK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Extract and print the outline without writing a PDF.
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Settings file (default: ./pdf_marker_config.json).
    #[arg(long, env = "PDF_BOOKMARK_CONFIG")]
    config: Option<PathBuf>,

    /// Save endpoint, key, model and sampling settings, then continue.
    #[arg(long)]
    save_config: bool,

    /// Delete the settings file, then continue.
    #[arg(long)]
    clear_config: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OnFailureArg {
    Skip,
    Abort,
}

impl From<OnFailureArg> for FailurePolicy {
    fn from(v: OnFailureArg) -> Self {
        match v {
            OnFailureArg::Skip => FailurePolicy::SkipPage,
            OnFailureArg::Abort => FailurePolicy::Abort,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; warnings still get through.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Settings file ────────────────────────────────────────────────────
    let settings_path = cli.config.clone().unwrap_or_else(settings::default_path);
    if cli.clear_config {
        settings::clear(&settings_path).context("Failed to clear settings")?;
        if !cli.quiet {
            eprintln!("{} Removed {}", green("✔"), settings_path.display());
        }
    }
    let saved = settings::load(&settings_path).context("Failed to load settings")?;
    let model = merge_model_config(&cli, saved.map(|s| s.model));
    if cli.save_config {
        save_settings(&settings_path, &model)?;
        if !cli.quiet {
            eprintln!("{} Saved {}", green("✔"), settings_path.display());
        }
    }

    let Some(ref input) = cli.input else {
        return Ok(());
    };

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BookmarkProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, model, progress_cb).await?;

    // ── Run, racing Ctrl-C ───────────────────────────────────────────────
    // Nothing is written until the whole range is reconciled, so dropping
    // the run on interrupt leaves no partial output behind.
    let output_path = cli.output.clone().unwrap_or_else(|| default_output(input));
    let run = async {
        if cli.dry_run {
            preview(input, &config).await
        } else {
            bookmark_file(input, &output_path, &config).await
        }
    };
    let report = tokio::select! {
        result = run => result.context("Bookmarking failed")?,
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("Interrupted; no output was written");
        }
    };

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
        return Ok(());
    }
    if cli.dry_run {
        print!("{}", report.outline.render_text());
    }
    if !cli.quiet {
        print_summary(&report, (!cli.dry_run).then_some(output_path.as_path()));
    }
    Ok(())
}

/// Persist `model`; a settings file without a key is never worth keeping.
fn save_settings(path: &Path, model: &ModelConfig) -> Result<()> {
    if model.api_key.trim().is_empty() {
        anyhow::bail!(
            "An API key is required to save settings.\n\
             Pass --api-key or set PDF_BOOKMARK_API_KEY together with --save-config."
        );
    }
    settings::save(path, model).context("Failed to save settings")
}

/// Flags win over the settings file, which wins over built-in defaults.
fn merge_model_config(cli: &Cli, saved: Option<ModelConfig>) -> ModelConfig {
    let base = saved.unwrap_or_default();
    ModelConfig {
        base_url: cli.base_url.clone().unwrap_or(base.base_url),
        api_key: cli.api_key.clone().unwrap_or(base.api_key),
        model: cli.model.clone().unwrap_or(base.model),
        dpi: cli.dpi.unwrap_or(base.dpi),
        max_tokens: cli.max_tokens.unwrap_or(base.max_tokens),
        temperature: cli.temperature.unwrap_or(base.temperature),
        json_mode: cli.json_mode || base.json_mode,
    }
}

/// Map CLI args to `BookmarkConfig`.
async fn build_config(
    cli: &Cli,
    model: ModelConfig,
    progress: Option<ProgressCallback>,
) -> Result<BookmarkConfig> {
    let mut builder = BookmarkConfig::builder()
        .model(model)
        .pages(PageRange::new(cli.start, cli.end))
        .page_offset(cli.offset)
        .retry(RetryPolicy {
            max_attempts: cli.max_attempts,
            backoff_ms: cli.backoff_ms,
        })
        .on_extraction_failure(cli.on_failure.into())
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref dir) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(dir.clone());
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `bookmarked_<name>` next to a local input, or in the working directory
/// for a URL.
fn default_output(input: &str) -> PathBuf {
    if is_url(input) {
        let name = input
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .and_then(|s| s.split(['?', '#']).next())
            .filter(|s| !s.is_empty())
            .unwrap_or("document.pdf");
        return PathBuf::from(format!("bookmarked_{name}"));
    }
    let path = Path::new(input);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    path.with_file_name(format!("bookmarked_{name}"))
}

fn print_summary(report: &BookmarkReport, written: Option<&Path>) {
    for w in &report.warnings {
        eprintln!("  {} {}", yellow("!"), w);
    }
    let stats = &report.stats;
    eprintln!(
        "{}  {} bookmarks from {}/{} pages  {}ms{}",
        if stats.failed_pages == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        stats.outline_entries,
        stats.processed_pages,
        stats.processed_pages + stats.failed_pages,
        stats.total_duration_ms,
        written
            .map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default(),
    );
}
