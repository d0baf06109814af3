//! Pipeline controller: capture → chunk → assemble under one deadline.
//!
//! ## State machine
//!
//! ```text
//! Idle ─▶ Capturing ─▶ Chunking ─▶ Assembling ─▶ Done
//!             │            │            │
//!             └────────────┴────────────┴──▶ Failed
//! ```
//!
//! There are no retries inside a run; [`AuditError::is_retryable`] tells the
//! caller whether running the whole pipeline again is worth it.
//!
//! ## Deadline
//!
//! The three stages run as one future wrapped in `tokio::time::timeout`.
//! When the deadline passes that future is dropped, which cancels whatever
//! stage was in flight: an open browser session closes through its guard
//! and a pending provider request is abandoned. A run never returns a
//! partial document.
//!
//! Chunking and assembly run on the blocking pool, where dropping the
//! future does not stop them. Both poll a shared cancellation flag that is
//! raised as soon as the run is abandoned, so they stop at their next band
//! or media part instead of finishing work nobody will read.

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::output::{AuditOutput, AuditStats};
use crate::pipeline::{capture, chunk, docx, input};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Idle,
    Capturing,
    Chunking,
    Assembling,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Capturing => "capturing",
            PipelineStage::Chunking => "chunking",
            PipelineStage::Assembling => "assembling",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Capture a page and assemble its audit report.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `url` — absolute http(s) URL of the page to audit
/// * `config` — audit configuration
///
/// # Errors
/// * [`AuditError::InvalidUrl`] — checked before anything is launched
/// * [`AuditError::Capture`] — the image source failed
/// * [`AuditError::InvalidImage`] / [`AuditError::EmptyInput`] — unusable capture
/// * [`AuditError::DeadlineExceeded`] — the run took longer than
///   `config.deadline_secs`
///
/// # Example
/// ```rust,no_run
/// use webpage_audit::{run_audit, AuditConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let output = run_audit("https://example.com", &AuditConfig::default()).await?;
/// std::fs::write("audit-report.docx", &output.document)?;
/// # Ok(())
/// # }
/// ```
pub async fn run_audit(
    url: impl AsRef<str>,
    config: &AuditConfig,
) -> Result<AuditOutput, AuditError> {
    let total_start = Instant::now();
    let url = url.as_ref().trim();
    info!("Starting audit: {}", url);

    let result = match validate_and_run(url, config, total_start).await {
        Ok(output) => Ok(output),
        Err(e) => {
            warn!("Audit of {} failed: {}", url, e);
            emit(config, PipelineStage::Failed);
            if let Some(ref cb) = config.progress_callback {
                cb.on_audit_failed(&e.to_string());
            }
            Err(e)
        }
    };

    if let Ok(ref output) = result {
        info!(
            "Audit complete: {} chunks, {} bytes, {}ms total",
            output.stats.chunk_count, output.stats.document_bytes, output.stats.total_ms
        );
        emit(config, PipelineStage::Done);
        if let Some(ref cb) = config.progress_callback {
            cb.on_audit_complete(&output.stats);
        }
    }
    result
}

/// Run an audit and write the report directly to a file.
///
/// Uses an atomic write (temp file in the target directory, then rename)
/// so a failed or interrupted run never leaves a truncated `.docx`.
pub async fn audit_to_file(
    url: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &AuditConfig,
) -> Result<AuditStats, AuditError> {
    let output = run_audit(url, config).await?;
    let path = output_path.as_ref().to_path_buf();

    let write_path = path.clone();
    tokio::task::spawn_blocking(move || write_atomically(&write_path, &output.document))
        .await
        .map_err(|e| AuditError::Internal(format!("write task failed: {e}")))?
        .map_err(|source| AuditError::OutputWriteFailed {
            path: path.clone(),
            source,
        })?;

    info!("Wrote report to {}", path.display());
    Ok(output.stats)
}

/// Synchronous wrapper around [`run_audit`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_audit_sync(
    url: impl AsRef<str>,
    config: &AuditConfig,
) -> Result<AuditOutput, AuditError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AuditError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run_audit(url, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn validate_and_run(
    url: &str,
    config: &AuditConfig,
    total_start: Instant,
) -> Result<AuditOutput, AuditError> {
    // ── Step 1: Validate input ───────────────────────────────────────────
    let target = input::parse_target_url(url)?;

    // ── Step 2: Resolve image source ─────────────────────────────────────
    let source = capture::resolve_source(config)?;
    debug!("Using image source '{}'", source.name());

    // ── Step 3: Run the stages under the deadline ────────────────────────
    let cancel = CancelOnDrop::default();
    let deadline = config.deadline();
    match tokio::time::timeout(
        deadline,
        run_stages(url, target.as_str(), source.as_ref(), config, total_start, cancel.flag()),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            cancel.raise();
            Err(AuditError::DeadlineExceeded {
                secs: config.deadline_secs,
            })
        }
    }
}

/// Raises the shared flag on timeout or when the run future itself is
/// dropped, whichever comes first.
#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl CancelOnDrop {
    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    fn raise(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            debug!("Cancelling blocking stages");
        }
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

async fn run_stages(
    source_url: &str,
    target: &str,
    source: &dyn capture::ImageSource,
    config: &AuditConfig,
    total_start: Instant,
    cancel: Arc<AtomicBool>,
) -> Result<AuditOutput, AuditError> {
    // ── Capture ──────────────────────────────────────────────────────────
    emit(config, PipelineStage::Capturing);
    let capture_start = Instant::now();
    let budget = config.deadline().saturating_sub(total_start.elapsed());
    let captured = source.capture(target, budget).await?;
    let capture_ms = capture_start.elapsed().as_millis() as u64;
    let (source_width, source_height) = (captured.width(), captured.height());
    info!(
        "Captured {}x{} via {} in {}ms",
        source_width,
        source_height,
        source.name(),
        capture_ms
    );

    // ── Chunk ────────────────────────────────────────────────────────────
    emit(config, PipelineStage::Chunking);
    let chunk_start = Instant::now();
    let (chunk_height, quality) = (config.chunk_height, config.jpeg_quality);
    let progress = config.progress_callback.clone();
    let chunk_cancel = Arc::clone(&cancel);
    let chunks = tokio::task::spawn_blocking(move || {
        chunk::chunk_capture(captured, chunk_height, quality, &chunk_cancel, &|index, total| {
            if let Some(ref cb) = progress {
                cb.on_chunk_encoded(index, total);
            }
        })
    })
    .await
    .map_err(|e| AuditError::Internal(format!("chunking task failed: {e}")))??;
    let chunk_ms = chunk_start.elapsed().as_millis() as u64;
    let chunk_count = chunks.len();
    debug!("Produced {} chunks in {}ms", chunk_count, chunk_ms);

    // ── Assemble ─────────────────────────────────────────────────────────
    emit(config, PipelineStage::Assembling);
    let assemble_start = Instant::now();
    let title_url = source_url.to_string();
    let (display_width, title_size) = (config.display_width, config.title_size_half_points);
    let document = tokio::task::spawn_blocking(move || {
        docx::AuditDocument::new(&title_url, chunks, source_width, display_width)?
            .with_title_size(title_size)
            .to_docx_cancellable(&cancel)
    })
    .await
    .map_err(|e| AuditError::Internal(format!("assembly task failed: {e}")))??;
    let assemble_ms = assemble_start.elapsed().as_millis() as u64;

    let stats = AuditStats {
        strategy: source.name().to_string(),
        source_width,
        source_height,
        chunk_count,
        document_bytes: document.len(),
        capture_ms,
        chunk_ms,
        assemble_ms,
        total_ms: total_start.elapsed().as_millis() as u64,
    };

    Ok(AuditOutput {
        source_url: source_url.to_string(),
        document,
        stats,
    })
}

fn emit(config: &AuditConfig, stage: PipelineStage) {
    debug!("Pipeline stage: {}", stage);
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage(stage);
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::pipeline::capture::{Capture, ImageSource, RasterImage};
    use crate::pipeline::encode::encode_jpeg;
    use crate::progress::AuditProgressCallback;
    use futures::future::BoxFuture;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct TallPage {
        width: u32,
        height: u32,
        calls: AtomicUsize,
    }

    impl TallPage {
        fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ImageSource for TallPage {
        fn name(&self) -> &'static str {
            "tall-page"
        }

        fn capture<'a>(
            &'a self,
            _url: &'a str,
            _budget: Duration,
        ) -> BoxFuture<'a, Result<Capture, CaptureError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(self.width, self.height, Rgb([1, 2, 3])));
            Box::pin(async move {
                let bytes = encode_jpeg(&img, 80).map_err(|e| CaptureError::UndecodableImage(e.to_string()))?;
                Ok(Capture::FullPage(RasterImage::decode(bytes)?))
            })
        }
    }

    /// Sleeps far past any test deadline and records whether it was dropped.
    struct Hang {
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl ImageSource for Hang {
        fn name(&self) -> &'static str {
            "hang"
        }

        fn capture<'a>(
            &'a self,
            _url: &'a str,
            _budget: Duration,
        ) -> BoxFuture<'a, Result<Capture, CaptureError>> {
            let flag = DropFlag(Arc::clone(&self.dropped));
            Box::pin(async move {
                let _flag = flag;
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(CaptureError::MissingOutputUrl)
            })
        }
    }

    #[derive(Default)]
    struct Stages(Mutex<Vec<PipelineStage>>, Mutex<Option<String>>);

    impl AuditProgressCallback for Stages {
        fn on_stage(&self, stage: PipelineStage) {
            self.0.lock().unwrap().push(stage);
        }

        fn on_audit_failed(&self, error: &str) {
            *self.1.lock().unwrap() = Some(error.to_string());
        }
    }

    #[tokio::test]
    async fn splits_tall_page_into_document() {
        let stages = Arc::new(Stages::default());
        let config = AuditConfig::builder()
            .source(Arc::new(TallPage::new(64, 2500)))
            .progress_callback(stages.clone())
            .build()
            .unwrap();

        let out = run_audit("https://example.com", &config).await.unwrap();
        assert_eq!(out.stats.chunk_count, 3);
        assert_eq!((out.stats.source_width, out.stats.source_height), (64, 2500));
        assert_eq!(out.stats.strategy, "tall-page");
        assert_eq!(out.stats.document_bytes, out.document.len());
        assert_eq!(&out.document[..2], b"PK");
        assert_eq!(
            *stages.0.lock().unwrap(),
            vec![
                PipelineStage::Capturing,
                PipelineStage::Chunking,
                PipelineStage::Assembling,
                PipelineStage::Done
            ]
        );
    }

    #[tokio::test]
    async fn invalid_url_never_reaches_source() {
        let source = Arc::new(TallPage::new(10, 10));
        let config = AuditConfig::builder().source(source.clone()).build().unwrap();
        let err = run_audit("not a url", &config).await.unwrap_err();
        assert!(matches!(err, AuditError::InvalidUrl { .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deadline_cancels_in_flight_capture() {
        let dropped = Arc::new(AtomicBool::new(false));
        let stages = Arc::new(Stages::default());
        let config = AuditConfig::builder()
            .source(Arc::new(Hang {
                dropped: Arc::clone(&dropped),
            }))
            .deadline_secs(1)
            .progress_callback(stages.clone())
            .build()
            .unwrap();

        let started = Instant::now();
        let err = run_audit("https://example.com", &config).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(err, AuditError::DeadlineExceeded { secs: 1 }));
        assert!(dropped.load(Ordering::SeqCst), "capture future was not dropped");
        assert_eq!(stages.0.lock().unwrap().last(), Some(&PipelineStage::Failed));
        assert!(stages.1.lock().unwrap().as_deref().unwrap().contains("timeout"));
    }

    /// Blocks the run inside the chunking transition so the deadline fires
    /// right after the chunking task has been handed to the blocking pool.
    struct StallOnChunking {
        stall: Duration,
        encoded: AtomicUsize,
    }

    impl AuditProgressCallback for StallOnChunking {
        fn on_stage(&self, stage: PipelineStage) {
            if stage == PipelineStage::Chunking {
                std::thread::sleep(self.stall);
            }
        }

        fn on_chunk_encoded(&self, _index: usize, _total: usize) {
            self.encoded.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn deadline_stops_background_chunking() {
        let progress = Arc::new(StallOnChunking {
            stall: Duration::from_millis(1200),
            encoded: AtomicUsize::new(0),
        });
        let config = AuditConfig::builder()
            .source(Arc::new(TallPage::new(64, 12_000)))
            .deadline_secs(1)
            .progress_callback(progress.clone())
            .build()
            .unwrap();

        let err = run_audit("https://example.com", &config).await.unwrap_err();
        assert!(matches!(err, AuditError::DeadlineExceeded { secs: 1 }), "{err:?}");
        let at_return = progress.encoded.load(Ordering::SeqCst);

        // ten bands would be done well within this if nothing stopped them
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let later = progress.encoded.load(Ordering::SeqCst);
        assert!(later <= at_return + 1, "{} bands encoded after the run failed", later - at_return);
        assert!(later < 10, "every band was encoded after the deadline");
    }

    #[tokio::test]
    async fn successful_run_reports_each_chunk() {
        let progress = Arc::new(StallOnChunking {
            stall: Duration::ZERO,
            encoded: AtomicUsize::new(0),
        });
        let config = AuditConfig::builder()
            .source(Arc::new(TallPage::new(64, 2500)))
            .progress_callback(progress.clone())
            .build()
            .unwrap();

        run_audit("https://example.com", &config).await.unwrap();
        assert_eq!(progress.encoded.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn audit_to_file_writes_docx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.docx");
        let config = AuditConfig::builder()
            .source(Arc::new(TallPage::new(32, 100)))
            .build()
            .unwrap();

        let stats = audit_to_file("https://example.com", &path, &config).await.unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), stats.document_bytes);
        assert_eq!(stats.chunk_count, 1);
    }

    #[test]
    fn sync_wrapper_runs_pipeline() {
        let config = AuditConfig::builder()
            .source(Arc::new(TallPage::new(32, 1300)))
            .build()
            .unwrap();
        let out = run_audit_sync("https://example.com", &config).unwrap();
        assert_eq!(out.stats.chunk_count, 2);
    }

    #[test]
    fn stage_display() {
        assert_eq!(PipelineStage::Capturing.to_string(), "capturing");
        assert_eq!(PipelineStage::Failed.to_string(), "failed");
    }
}
