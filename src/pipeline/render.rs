//! PDF rasterisation: render one TOC page to a PNG via pdfium.
//!
//! The [`Rasterizer`] trait is the seam between the pipeline and the PDF
//! backend. The orchestrator calls it from `tokio::task::spawn_blocking`:
//! pdfium is CPU-bound and must not stall the async worker threads.
//!
//! ## Why cap pixels as well as DPI?
//!
//! DPI is what keeps small print legible, but page sizes vary wildly; a
//! 300-DPI render of a fold-out page can exceed what vision APIs accept.
//! `max_rendered_pixels` caps either edge regardless of physical size.

use crate::error::BookmarkError;
use crate::pipeline::encode;
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Rasterisation failure for one page.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RasterError {
    /// The index does not name a page of the document.
    #[error("page index {page_index} is out of bounds (document has {page_count} pages)")]
    OutOfBounds { page_index: usize, page_count: usize },

    /// The backend could not render the page (corrupt content, encoder error).
    #[error("{detail}")]
    Failed { page_index: usize, detail: String },
}

/// Produces a lossless raster image of one page.
pub trait Rasterizer: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Render the 0-indexed page at `dpi`, returning PNG bytes.
    fn render(&self, page_index: usize, dpi: u32) -> Result<Vec<u8>, RasterError>;
}

/// Bind pdfium, preferring an explicit directory, then the working
/// directory, then the system library path.
pub fn bind_pdfium(library_dir: Option<&Path>) -> Result<Pdfium, BookmarkError> {
    let bindings = match library_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| BookmarkError::PdfiumBindingFailed(format!("{e:?}")))?;

    Ok(Pdfium::new(bindings))
}

/// pdfium-backed [`Rasterizer`] over an in-memory document.
pub struct PdfiumRasterizer {
    pdfium: Pdfium,
    bytes: Arc<[u8]>,
    password: Option<String>,
    page_count: usize,
    max_pixels: u32,
}

impl PdfiumRasterizer {
    /// Open `bytes`, failing early on corrupt or locked documents.
    pub fn open(
        pdfium: Pdfium,
        bytes: Arc<[u8]>,
        password: Option<String>,
        max_pixels: u32,
    ) -> Result<Self, BookmarkError> {
        let page_count = {
            let document = pdfium
                .load_pdf_from_byte_slice(&bytes, password.as_deref())
                .map_err(|e| load_error(e, password.is_some()))?;
            document.pages().len() as usize
        };
        info!("PDF loaded: {} pages", page_count);

        Ok(Self {
            pdfium,
            bytes,
            password,
            page_count,
            max_pixels,
        })
    }
}

fn load_error(e: PdfiumError, had_password: bool) -> BookmarkError {
    let err_str = format!("{e:?}");
    if err_str.contains("Password") || err_str.contains("password") {
        if had_password {
            BookmarkError::WrongPassword
        } else {
            BookmarkError::PasswordRequired
        }
    } else {
        BookmarkError::CorruptPdf { detail: err_str }
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn render(&self, page_index: usize, dpi: u32) -> Result<Vec<u8>, RasterError> {
        if page_index >= self.page_count {
            return Err(RasterError::OutOfBounds {
                page_index,
                page_count: self.page_count,
            });
        }
        let failed = |detail: String| RasterError::Failed { page_index, detail };

        let document = self
            .pdfium
            .load_pdf_from_byte_slice(&self.bytes, self.password.as_deref())
            .map_err(|e| failed(format!("{e:?}")))?;
        let page = document
            .pages()
            .get(page_index as u16)
            .map_err(|e| failed(format!("{e:?}")))?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("{e:?}")))?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} at {} DPI → {}x{} px",
            page_index + 1,
            dpi,
            image.width(),
            image.height()
        );

        encode::encode_png(&image).map_err(|e| failed(format!("PNG encoding failed: {e}")))
    }
}
