//! Configuration types for a bookmarking run.
//!
//! Everything the pipeline needs arrives through one [`BookmarkConfig`]
//! value handed to the entry point at call time; there is no ambient,
//! process-wide settings object. The persisted settings file
//! ([`crate::settings`]) is only a convenience for the CLI, which turns it
//! into a `BookmarkConfig` before calling the library.

use crate::error::BookmarkError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Connection and sampling parameters for the vision endpoint.
///
/// All fields are free-form; beyond the range checks in
/// [`BookmarkConfigBuilder::build`] nothing is validated until the endpoint
/// itself answers.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer credential sent with every request.
    pub api_key: String,
    /// Vision-capable model identifier.
    pub model: String,
    /// Resolution used to rasterise each TOC page. Default: 300.
    ///
    /// Printed TOCs use small type and dotted leaders; 300 DPI keeps page
    /// numbers legible for the model.
    pub dpi: u32,
    /// Maximum completion tokens per page. Default: 2000.
    pub max_tokens: usize,
    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,
    /// Ask the endpoint for `response_format: {"type": "json_object"}`.
    ///
    /// Only the OpenAI-compatible transport sends it. In that mode models
    /// answer with an object wrapping the entry list, which the parser
    /// unwraps. Default: false.
    #[serde(default)]
    pub json_mode: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_key: String::new(),
            model: "deepseek-chat".to_string(),
            dpi: 300,
            max_tokens: 2000,
            temperature: 0.1,
            json_mode: false,
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" },
            )
            .field("model", &self.model)
            .field("dpi", &self.dpi)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("json_mode", &self.json_mode)
            .finish()
    }
}

/// Inclusive range of 1-indexed physical pages holding the printed TOC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Expand the range into ascending 0-indexed page indices, clipped to the
    /// document.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let start = self.start.max(1);
        let end = self.end.min(total_pages);
        if start > end {
            return Vec::new();
        }
        (start - 1..end).collect()
    }

    pub fn len(&self) -> usize {
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PageRange {
    /// The original tool's default: the first ten pages.
    fn default() -> Self {
        Self { start: 1, end: 10 }
    }
}

/// Retry behaviour for a single page's vision call.
///
/// Retries happen in the orchestration layer, never inside the client.
/// Waits double after each attempt: with 500 ms and 3 attempts the sequence
/// is 500 ms → 1 s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per page including the first. Minimum 1.
    pub max_attempts: u32,
    /// Wait before the first retry, in milliseconds.
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Wait before attempt number `attempt` (1-indexed; the first attempt never waits).
    pub fn delay_before(&self, attempt: u32) -> u64 {
        if attempt <= 1 {
            return 0;
        }
        self.backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt - 2))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// What the run does when a page's vision call fails after all attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Record a warning, contribute no entries, continue. (default)
    #[default]
    SkipPage,
    /// Abort the whole run; the document is left untouched.
    Abort,
}

/// Configuration for one bookmarking run.
///
/// Built via [`BookmarkConfig::builder()`] or [`BookmarkConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_bookmarker::{BookmarkConfig, PageRange};
///
/// let config = BookmarkConfig::builder()
///     .pages(PageRange::new(5, 7))
///     .page_offset(14)
///     .base_url("https://api.openai.com/v1")
///     .model_name("gpt-4o")
///     .build()
///     .unwrap();
/// assert_eq!(config.page_offset, 14);
/// ```
#[derive(Clone)]
pub struct BookmarkConfig {
    /// Endpoint, credential and sampling parameters.
    pub model: ModelConfig,

    /// Physical pages that contain the printed table of contents.
    pub pages: PageRange,

    /// Added to every printed page number to obtain the physical page.
    ///
    /// If the TOC says "Chapter 1 … 1" but chapter 1 starts on physical page
    /// 15, the offset is 14.
    pub page_offset: i64,

    /// Per-page retry policy for vision calls.
    pub retry: RetryPolicy,

    /// Whether a failed page is skipped or aborts the run.
    pub on_extraction_failure: FailurePolicy,

    /// Per-call timeout for the vision endpoint, in seconds. Default: 30.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs, in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Safety cap on either rendered dimension, in pixels. Default: 4000.
    ///
    /// A 300-DPI render of an oversized page would otherwise exceed the
    /// upload limits of most vision APIs.
    pub max_rendered_pixels: u32,

    /// Custom system prompt. If `None`, uses [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory containing the pdfium shared library. If `None`, the
    /// working directory and then the system library path are tried.
    pub pdfium_library_path: Option<PathBuf>,

    /// Pre-constructed `edgequake-llm` provider. When set, it is used
    /// instead of the OpenAI-compatible HTTP client.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// `edgequake-llm` provider name (e.g. "openai", "anthropic", "ollama")
    /// combined with `model.model`. Ignored when `provider` is set.
    pub provider_name: Option<String>,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BookmarkConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            pages: PageRange::default(),
            page_offset: 0,
            retry: RetryPolicy::default(),
            on_extraction_failure: FailurePolicy::default(),
            api_timeout_secs: 30,
            download_timeout_secs: 120,
            max_rendered_pixels: 4000,
            system_prompt: None,
            password: None,
            pdfium_library_path: None,
            provider: None,
            provider_name: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BookmarkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookmarkConfig")
            .field("model", &self.model)
            .field("pages", &self.pages)
            .field("page_offset", &self.page_offset)
            .field("retry", &self.retry)
            .field("on_extraction_failure", &self.on_extraction_failure)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("provider_name", &self.provider_name)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl BookmarkConfig {
    /// Create a new builder for `BookmarkConfig`.
    pub fn builder() -> BookmarkConfigBuilder {
        BookmarkConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`BookmarkConfig`].
pub struct BookmarkConfigBuilder {
    config: BookmarkConfig,
}

impl BookmarkConfigBuilder {
    pub fn model(mut self, model: ModelConfig) -> Self {
        self.config.model = model;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.model.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.model.api_key = key.into();
        self
    }

    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.config.model.model = name.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.model.dpi = dpi;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.model.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.model.temperature = t;
        self
    }

    pub fn json_mode(mut self, enabled: bool) -> Self {
        self.config.model.json_mode = enabled;
        self
    }

    pub fn pages(mut self, range: PageRange) -> Self {
        self.config.pages = range;
        self
    }

    pub fn page_offset(mut self, offset: i64) -> Self {
        self.config.page_offset = offset;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn on_extraction_failure(mut self, policy: FailurePolicy) -> Self {
        self.config.on_extraction_failure = policy;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(dir.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BookmarkConfig, BookmarkError> {
        let c = &self.config;
        if c.model.dpi < 72 || c.model.dpi > 600 {
            return Err(BookmarkError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.model.dpi
            )));
        }
        if !(0.0..=2.0).contains(&c.model.temperature) {
            return Err(BookmarkError::InvalidConfig(format!(
                "Temperature must be 0.0–2.0, got {}",
                c.model.temperature
            )));
        }
        if c.model.max_tokens == 0 {
            return Err(BookmarkError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.retry.max_attempts == 0 {
            return Err(BookmarkError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.pages.start == 0 {
            return Err(BookmarkError::InvalidConfig(
                "Pages are 1-indexed, start must be ≥ 1".into(),
            ));
        }
        if c.pages.start > c.pages.end {
            return Err(BookmarkError::InvalidConfig(format!(
                "Start page {} is after end page {}",
                c.pages.start, c.pages.end
            )));
        }
        Ok(self.config)
    }
}
