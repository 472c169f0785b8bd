//! Input resolution: load a user-supplied path or URL into memory.
//!
//! The whole document is held as bytes for the duration of the run: pdfium
//! renders TOC pages from the buffer and lopdf rewrites the outline from the
//! same buffer, so both see exactly the same file even if the source on disk
//! changes mid-run. The `%PDF` magic is checked up front so callers get a
//! meaningful error rather than a parser failure deep inside a backend.

use crate::error::BookmarkError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A PDF loaded into memory.
#[derive(Debug, Clone)]
pub struct SourcePdf {
    /// Path or URL the bytes came from, for messages and default output names.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourcePdf {
    /// Wrap in-memory bytes, validating the PDF magic.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, BookmarkError> {
        let name = name.into();
        check_magic(&name, &bytes)?;
        Ok(Self { name, bytes })
    }

    /// File name component of the source, e.g. `book.pdf`.
    pub fn file_name(&self) -> String {
        let trimmed = self.name.trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        let last = last.split(['?', '#']).next().unwrap_or(last);
        if last.is_empty() {
            "document.pdf".to_string()
        } else {
            last.to_string()
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load `input` (local path or HTTP/HTTPS URL) into memory.
pub async fn load_input(input: &str, timeout_secs: u64) -> Result<SourcePdf, BookmarkError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

fn check_magic(name: &str, bytes: &[u8]) -> Result<(), BookmarkError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(BookmarkError::NotAPdf {
            source_name: name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

async fn read_local(path: &Path) -> Result<SourcePdf, BookmarkError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => BookmarkError::PermissionDenied {
            path: PathBuf::from(path),
        },
        _ => BookmarkError::FileNotFound {
            path: PathBuf::from(path),
        },
    })?;

    debug!("Read local PDF {} ({} bytes)", path.display(), bytes.len());
    SourcePdf::from_bytes(path.display().to_string(), bytes)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<SourcePdf, BookmarkError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BookmarkError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            BookmarkError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            BookmarkError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(BookmarkError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    info!("Downloaded {} bytes", bytes.len());
    SourcePdf::from_bytes(url, bytes.to_vec())
}
