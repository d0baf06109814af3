//! Chunking: cut a full-page capture into bounded-height bands.
//!
//! ## Geometry
//!
//! For a page of height `H` and chunk height `C` there are `ceil(H / C)`
//! bands; band `i` starts at `i·C` and is `min(C, H − i·C)` tall. The bands
//! tile the page exactly: contiguous, non-overlapping, heights summing to
//! `H`, and the last one is never empty. [`plan_bands`] is the single
//! implementation of that rule; the local renderer uses it to decide where
//! to screenshot, and [`split`] uses it to decide where to crop.
//!
//! ## Two inputs, one output
//!
//! * [`Capture::FullPage`] — decode once, crop each band, re-encode as JPEG.
//!   A page that fits in one band is passed through without re-encoding.
//! * [`Capture::Bands`] — already cut by the renderer; [`from_bands`] only
//!   checks the tiling and wraps each band.
//!
//! Re-encoding is the slow part, so [`chunk_capture`] checks a cancellation
//! flag before decoding and before each band and stops with
//! [`AuditError::Cancelled`] once it is set.

use crate::error::AuditError;
use crate::pipeline::capture::{Capture, CapturedBand, RasterImage};
use crate::pipeline::encode;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// JPEG quality used by [`split`].
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Position of one band within the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub index: usize,
    pub offset_y: u32,
    pub height: u32,
}

/// One horizontal slice of the page, ready for embedding.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageChunk {
    /// 0-based, top to bottom.
    pub index: usize,
    pub offset_y: u32,
    pub height: u32,
    /// Encoded image bytes for exactly this band.
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for ImageChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageChunk")
            .field("index", &self.index)
            .field("offset_y", &self.offset_y)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Compute the band layout for a page. Empty when either input is zero.
pub fn plan_bands(height: u32, chunk_height: u32) -> Vec<Band> {
    if height == 0 || chunk_height == 0 {
        return Vec::new();
    }
    let count = height.div_ceil(chunk_height) as usize;
    (0..count)
        .map(|i| {
            let offset_y = i as u32 * chunk_height;
            Band {
                index: i,
                offset_y,
                height: chunk_height.min(height - offset_y),
            }
        })
        .collect()
}

/// Split a full-page image into chunks at [`DEFAULT_JPEG_QUALITY`].
pub fn split(image: RasterImage, chunk_height: u32) -> Result<Vec<ImageChunk>, AuditError> {
    split_with_quality(image, chunk_height, DEFAULT_JPEG_QUALITY)
}

/// Split a full-page image into chunks, re-encoding bands at `quality`.
///
/// CPU-bound for tall pages; the controller runs it on the blocking pool.
pub fn split_with_quality(
    image: RasterImage,
    chunk_height: u32,
    quality: u8,
) -> Result<Vec<ImageChunk>, AuditError> {
    split_bands(image, chunk_height, quality, &AtomicBool::new(false), &|_, _| {})
}

fn split_bands(
    image: RasterImage,
    chunk_height: u32,
    quality: u8,
    cancel: &AtomicBool,
    on_chunk: &dyn Fn(usize, usize),
) -> Result<Vec<ImageChunk>, AuditError> {
    if chunk_height == 0 {
        return Err(AuditError::InvalidConfig("Chunk height must be ≥ 1".into()));
    }
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(AuditError::InvalidImage(format!(
            "cannot split a {width}x{height} image"
        )));
    }

    if height <= chunk_height {
        debug!("Page fits in one chunk ({}px ≤ {}px)", height, chunk_height);
        return Ok(vec![ImageChunk {
            index: 0,
            offset_y: 0,
            height,
            pixels: image.into_pixels(),
        }]);
    }

    check_cancelled(cancel, "chunking")?;
    let decoded = encode::decode(image.pixels())
        .map_err(|e| AuditError::InvalidImage(format!("decode failed: {e}")))?;
    if decoded.width() != width || decoded.height() != height {
        return Err(AuditError::InvalidImage(format!(
            "header says {}x{} but pixels decode to {}x{}",
            width,
            height,
            decoded.width(),
            decoded.height()
        )));
    }
    drop(image);

    let bands = plan_bands(height, chunk_height);
    let total = bands.len();
    let mut chunks = Vec::with_capacity(total);
    for band in bands {
        if cancel.load(Ordering::SeqCst) {
            debug!("Chunking cancelled before band {} of {}", band.index, total);
            return Err(AuditError::Cancelled { stage: "chunking" });
        }
        let slice = decoded.crop_imm(0, band.offset_y, width, band.height);
        let pixels = encode::encode_jpeg(&slice, quality)
            .map_err(|e| AuditError::InvalidImage(format!("re-encode of band {} failed: {e}", band.index)))?;
        debug!(
            "Chunk {}: y={} h={} → {} bytes",
            band.index,
            band.offset_y,
            band.height,
            pixels.len()
        );
        chunks.push(ImageChunk {
            index: band.index,
            offset_y: band.offset_y,
            height: band.height,
            pixels,
        });
        on_chunk(band.index, total);
    }
    Ok(chunks)
}

pub(crate) fn check_cancelled(cancel: &AtomicBool, stage: &'static str) -> Result<(), AuditError> {
    if cancel.load(Ordering::SeqCst) {
        debug!("Stopping {}: run was cancelled", stage);
        return Err(AuditError::Cancelled { stage });
    }
    Ok(())
}

/// Wrap bands captured directly by the renderer.
///
/// Bands may arrive in any order; they are sorted by index and must tile
/// `full_height` exactly.
pub fn from_bands(
    width: u32,
    full_height: u32,
    mut bands: Vec<CapturedBand>,
) -> Result<Vec<ImageChunk>, AuditError> {
    if width == 0 || full_height == 0 {
        return Err(AuditError::InvalidImage(format!(
            "renderer reported a {width}x{full_height} page"
        )));
    }
    if bands.is_empty() {
        return Err(AuditError::EmptyInput);
    }

    bands.sort_by_key(|b| b.index);
    let mut expected_y = 0u32;
    for (i, band) in bands.iter().enumerate() {
        if band.index != i || band.offset_y != expected_y || band.height == 0 {
            return Err(AuditError::InvalidImage(format!(
                "band {} (index {}, y={}, h={}) breaks the tiling at y={}",
                i, band.index, band.offset_y, band.height, expected_y
            )));
        }
        if band.pixels.is_empty() {
            return Err(AuditError::InvalidImage(format!("band {i} has no image data")));
        }
        expected_y += band.height;
    }
    if expected_y != full_height {
        return Err(AuditError::InvalidImage(format!(
            "bands cover {expected_y}px of a {full_height}px page"
        )));
    }

    Ok(bands
        .into_iter()
        .map(|b| ImageChunk {
            index: b.index,
            offset_y: b.offset_y,
            height: b.height,
            pixels: b.pixels,
        })
        .collect())
}

/// Turn any capture into chunks.
///
/// `on_chunk(index, total)` fires after each band cut from a full-page
/// capture; renderer bands are already cut and do not report.
pub fn chunk_capture(
    capture: Capture,
    chunk_height: u32,
    quality: u8,
    cancel: &AtomicBool,
    on_chunk: &dyn Fn(usize, usize),
) -> Result<Vec<ImageChunk>, AuditError> {
    match capture {
        Capture::FullPage(image) => split_bands(image, chunk_height, quality, cancel, on_chunk),
        Capture::Bands {
            width,
            full_height,
            bands,
        } => from_bands(width, full_height, bands),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::{encode_jpeg, probe_dimensions};
    use image::{DynamicImage, Rgb, RgbImage};
    use proptest::prelude::*;

    fn raster(w: u32, h: u32) -> RasterImage {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |_, y| {
            Rgb([(y % 256) as u8, 128, 200])
        }));
        RasterImage::decode(encode_jpeg(&img, 80).unwrap()).unwrap()
    }

    fn heights(chunks: &[ImageChunk]) -> Vec<u32> {
        chunks.iter().map(|c| c.height).collect()
    }

    #[test]
    fn exact_fit_is_one_chunk() {
        let chunks = split(raster(8, 1200), 1200).unwrap();
        assert_eq!(heights(&chunks), vec![1200]);
        assert_eq!(chunks[0].offset_y, 0);
    }

    #[test]
    fn remainder_becomes_short_last_chunk() {
        let chunks = split(raster(8, 1300), 1200).unwrap();
        assert_eq!(heights(&chunks), vec![1200, 100]);
        assert_eq!(chunks[1].offset_y, 1200);
        assert_eq!(probe_dimensions(&chunks[0].pixels).unwrap(), (8, 1200));
        assert_eq!(probe_dimensions(&chunks[1].pixels).unwrap(), (8, 100));
    }

    #[test]
    fn even_multiple_has_no_remainder_chunk() {
        let chunks = split(raster(8, 2400), 1200).unwrap();
        assert_eq!(heights(&chunks), vec![1200, 1200]);
    }

    #[test]
    fn short_page_passes_bytes_through() {
        let img = raster(16, 300);
        let original = img.pixels().to_vec();
        let chunks = split(img, 1200).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].pixels, original);
    }

    #[test]
    fn zero_chunk_height_is_config_error() {
        assert!(matches!(
            split(raster(8, 10), 0),
            Err(AuditError::InvalidConfig(_))
        ));
    }

    /// Collects formatted log lines emitted on the current thread.
    #[derive(Clone, Default)]
    struct LogSink(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn with_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let sink = LogSink::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        let logs = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        (out, logs)
    }

    #[test]
    fn cancelled_split_encodes_nothing() {
        let cancel = AtomicBool::new(true);
        let encoded = std::sync::atomic::AtomicUsize::new(0);
        let (result, logs) = with_logs(|| {
            chunk_capture(
                Capture::FullPage(raster(8, 3600)),
                1200,
                DEFAULT_JPEG_QUALITY,
                &cancel,
                &|_, _| {
                    encoded.fetch_add(1, Ordering::SeqCst);
                },
            )
        });
        assert!(matches!(result, Err(AuditError::Cancelled { stage: "chunking" })));
        assert_eq!(encoded.load(Ordering::SeqCst), 0);
        assert!(logs.contains("run was cancelled"), "logs: {logs}");
        assert!(!logs.contains("Chunk 0:"), "logs: {logs}");
    }

    #[test]
    fn cancel_mid_split_stops_at_next_band() {
        let cancel = AtomicBool::new(false);
        let seen = std::sync::Mutex::new(Vec::new());
        let (result, logs) = with_logs(|| {
            chunk_capture(
                Capture::FullPage(raster(8, 6000)),
                1200,
                DEFAULT_JPEG_QUALITY,
                &cancel,
                &|index, total| {
                    seen.lock().unwrap().push((index, total));
                    if index == 1 {
                        cancel.store(true, Ordering::SeqCst);
                    }
                },
            )
        });
        assert!(matches!(result, Err(AuditError::Cancelled { .. })));
        assert_eq!(*seen.lock().unwrap(), vec![(0, 5), (1, 5)]);
        assert!(logs.contains("Chunking cancelled before band 2 of 5"), "logs: {logs}");
    }

    #[test]
    fn chunk_capture_reports_each_band() {
        let seen = std::sync::Mutex::new(Vec::new());
        let chunks = chunk_capture(
            Capture::FullPage(raster(8, 2500)),
            1200,
            DEFAULT_JPEG_QUALITY,
            &AtomicBool::new(false),
            &|index, total| seen.lock().unwrap().push((index, total)),
        )
        .unwrap();
        assert_eq!(heights(&chunks), vec![1200, 1200, 100]);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn plan_bands_zero_inputs_are_empty() {
        assert!(plan_bands(0, 1200).is_empty());
        assert!(plan_bands(1200, 0).is_empty());
    }

    fn band(index: usize, offset_y: u32, height: u32) -> CapturedBand {
        CapturedBand {
            index,
            offset_y,
            height,
            pixels: vec![0xFF, 0xD8, 0xFF],
        }
    }

    #[test]
    fn from_bands_sorts_out_of_order_completion() {
        let chunks = from_bands(
            1280,
            2500,
            vec![band(2, 2400, 100), band(0, 0, 1200), band(1, 1200, 1200)],
        )
        .unwrap();
        let idx: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn from_bands_rejects_gaps() {
        let err = from_bands(1280, 2500, vec![band(0, 0, 1200), band(1, 1300, 1200)]).unwrap_err();
        assert!(matches!(err, AuditError::InvalidImage(_)));
    }

    #[test]
    fn from_bands_rejects_short_coverage() {
        let err = from_bands(1280, 2500, vec![band(0, 0, 1200)]).unwrap_err();
        assert!(err.to_string().contains("1200px of a 2500px"));
    }

    #[test]
    fn from_bands_empty_is_empty_input() {
        assert!(matches!(
            from_bands(1280, 100, vec![]),
            Err(AuditError::EmptyInput)
        ));
    }

    #[test]
    fn from_bands_zero_width_is_invalid_image() {
        assert!(matches!(
            from_bands(0, 100, vec![band(0, 0, 100)]),
            Err(AuditError::InvalidImage(_))
        ));
    }

    proptest! {
        #[test]
        fn bands_tile_the_page(height in 1u32..200_000, chunk in 1u32..5_000) {
            let bands = plan_bands(height, chunk);
            prop_assert_eq!(bands.len() as u32, height.div_ceil(chunk));
            prop_assert_eq!(bands.iter().map(|b| b.height as u64).sum::<u64>(), height as u64);
            prop_assert_eq!(bands[0].offset_y, 0);
            for (i, b) in bands.iter().enumerate() {
                prop_assert_eq!(b.index, i);
                prop_assert!(b.height > 0 && b.height <= chunk);
                prop_assert_eq!(b.offset_y, i as u32 * chunk);
            }
            for pair in bands.windows(2) {
                prop_assert_eq!(pair[0].offset_y + pair[0].height, pair[1].offset_y);
            }
        }
    }
}
