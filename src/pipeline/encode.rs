//! Image encoding: `DynamicImage` → PNG bytes → base64 payloads.
//!
//! PNG is chosen over JPEG because it is lossless: compression artefacts
//! around small digits and dotted leaders are exactly what makes a model
//! misread a page number. `detail: "high"` asks GPT-4-class models to use
//! their full tile budget instead of a single low-resolution overview.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

pub const PNG_MIME: &str = "image/png";

/// Encode a rasterised page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} page → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// `data:` URI for an OpenAI-style `image_url` content part.
pub fn png_data_uri(png: &[u8]) -> String {
    format!("data:{};base64,{}", PNG_MIME, STANDARD.encode(png))
}

/// Wrap PNG bytes for an `edgequake-llm` provider.
pub fn png_image_data(png: &[u8]) -> ImageData {
    ImageData::new(STANDARD.encode(png), PNG_MIME).with_detail("high")
}
