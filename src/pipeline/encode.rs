//! Page encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! The vision call embeds each page as a base64 data-URI. PNG is lossless,
//! so small print in tables and chart labels survives for extraction.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page for the extraction call.
///
/// `detail: "high"` lets tiling providers read fine print and table cells
/// instead of a single low-resolution overview.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
