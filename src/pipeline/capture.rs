//! Image sources: the capture stage's polymorphic interface.
//!
//! An [`ImageSource`] turns a URL into pixels. Two implementations ship with
//! the crate and are selected by [`CaptureStrategy`]:
//!
//! | Strategy | Type | Yields |
//! |----------|------|--------|
//! | `LocalRenderer`  | [`crate::pipeline::browser::LocalRenderer`]  | [`Capture::Bands`] |
//! | `RemoteProvider` | [`crate::pipeline::provider::RemoteProvider`] | [`Capture::FullPage`] |
//!
//! The local renderer screenshots the page band by band, so the chunker only
//! has to wrap what it gets; the provider returns one tall image that the
//! chunker must cut. [`Capture`] carries that difference forward instead of
//! forcing the local renderer to stitch bands it would only cut again.
//!
//! Callers can plug in their own source through
//! [`crate::config::AuditConfigBuilder::source`]; it takes precedence over
//! the configured strategy.

use crate::config::{AuditConfig, CaptureStrategy};
use crate::error::{AuditError, CaptureError};
use crate::pipeline::encode;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One captured raster image.
///
/// Only constructible through [`RasterImage::decode`], which reads the
/// dimensions from the encoded header, so `width × height` always matches
/// what `pixels` decodes to.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterImage {
    /// Wrap encoded image bytes (JPEG, PNG), learning their dimensions.
    pub fn decode(pixels: Vec<u8>) -> Result<Self, CaptureError> {
        let (width, height) = encode::probe_dimensions(&pixels)
            .map_err(|e| CaptureError::UndecodableImage(e.to_string()))?;
        if width == 0 || height == 0 {
            return Err(CaptureError::UndecodableImage(format!(
                "image has zero dimension ({width}x{height})"
            )));
        }
        debug!("Decoded raster header: {}x{} ({} bytes)", width, height, pixels.len());
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The encoded bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// One band screenshotted directly by the local renderer.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedBand {
    pub index: usize,
    pub offset_y: u32,
    pub height: u32,
    /// Encoded JPEG bytes for exactly this band.
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for CapturedBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedBand")
            .field("index", &self.index)
            .field("offset_y", &self.offset_y)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// What an image source produced.
#[derive(Debug, Clone)]
pub enum Capture {
    /// One image covering the whole page; the chunker splits it.
    FullPage(RasterImage),
    /// The page already captured as consecutive bands.
    Bands {
        /// Pixel width shared by every band.
        width: u32,
        /// Measured full document height.
        full_height: u32,
        bands: Vec<CapturedBand>,
    },
}

impl Capture {
    /// Width of the capture; the document's scale basis.
    pub fn width(&self) -> u32 {
        match self {
            Capture::FullPage(img) => img.width(),
            Capture::Bands { width, .. } => *width,
        }
    }

    /// Full page height in pixels.
    pub fn height(&self) -> u32 {
        match self {
            Capture::FullPage(img) => img.height(),
            Capture::Bands { full_height, .. } => *full_height,
        }
    }
}

/// Acquires a full-page raster of a URL.
///
/// `budget` is the time the controller still has left; implementations
/// should bound their own network waits by it. The controller additionally
/// drops the returned future when the overall deadline passes, so any
/// resource held across an `.await` must release itself on drop.
///
/// Implementations return a boxed future rather than using `async fn` so
/// the trait stays object-safe for `Arc<dyn ImageSource>`.
pub trait ImageSource: Send + Sync {
    /// Short identifier used in logs and [`crate::output::AuditStats`].
    fn name(&self) -> &'static str;

    fn capture<'a>(
        &'a self,
        url: &'a str,
        budget: Duration,
    ) -> BoxFuture<'a, Result<Capture, CaptureError>>;
}

/// Resolve the image source for a run, from most-specific to least-specific.
///
/// 1. **Pre-built source** (`config.source`) — used as-is. This is how tests
///    and embedding applications inject their own capture backend.
/// 2. **Configured strategy** (`config.strategy`) — build the matching
///    built-in source from the rest of the config.
pub fn resolve_source(config: &AuditConfig) -> Result<Arc<dyn ImageSource>, AuditError> {
    if let Some(ref source) = config.source {
        return Ok(Arc::clone(source));
    }

    match config.strategy {
        CaptureStrategy::RemoteProvider => Ok(Arc::new(
            crate::pipeline::provider::RemoteProvider::from_config(config)?,
        )),
        #[cfg(feature = "local-renderer")]
        CaptureStrategy::LocalRenderer => Ok(Arc::new(
            crate::pipeline::browser::LocalRenderer::from_config(config),
        )),
        #[cfg(not(feature = "local-renderer"))]
        CaptureStrategy::LocalRenderer => Err(AuditError::InvalidConfig(
            "The local renderer is not compiled in; rebuild with --features local-renderer \
             or use the remote provider strategy"
                .into(),
        )),
    }
}
