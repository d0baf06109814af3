//! Image encoding: `DynamicImage` ⇄ JPEG bytes.
//!
//! Every image embedded in the report is JPEG. Screenshots of real pages
//! are photographic enough that PNG bands run 5–10× larger, and a report
//! of a long page can carry dozens of bands.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader, ImageResult};
use std::io::Cursor;
use tracing::debug;

/// Encode an image as baseline JPEG at `quality` (1–100).
///
/// Alpha is dropped: JPEG has no alpha channel and screenshots are opaque.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;

    debug!(
        "Encoded {}x{} → {} bytes JPEG (q={})",
        img.width(),
        img.height(),
        buf.len(),
        quality
    );
    Ok(buf)
}

/// Read width and height from an encoded image header without decoding
/// the pixel data.
pub fn probe_dimensions(bytes: &[u8]) -> ImageResult<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
}

/// Fully decode an encoded image.
pub fn decode(bytes: &[u8]) -> ImageResult<DynamicImage> {
    image::load_from_memory(bytes)
}
