//! Local renderer: capture a page with headless Chrome over CDP.
//!
//! ## Sequence
//!
//! 1. Launch Chrome with a fixed window and emulated viewport.
//! 2. Navigate and wait for the main frame's `networkIdle` lifecycle event
//!    (no network connections for 500 ms), bounded by the navigation
//!    timeout. A page that never goes quiet fails with a navigation timeout.
//! 3. Scroll down in small steps so lazy-loaded content materialises.
//!    The loop is capped at `max_scroll_steps`; infinite-scroll pages would
//!    otherwise never end.
//! 4. Settle, measure the document height, scroll back to the top.
//! 5. For every band from [`plan_bands`], scroll to it, let it paint and
//!    take a clipped JPEG screenshot of exactly that band.
//!
//! The result is [`Capture::Bands`]: the page is never stitched into one
//! image only to be cut up again.
//!
//! ## Session lifetime
//!
//! [`BrowserSession`] owns the browser process and the CDP handler task.
//! The success path closes it explicitly; every other exit (an error, a
//! panic, or the controller dropping this future at its deadline) goes
//! through `Drop`, which hands the close to the runtime in the background.

use crate::config::{AuditConfig, Viewport};
use crate::error::CaptureError;
use crate::pipeline::capture::{Capture, CapturedBand, ImageSource};
use crate::pipeline::chunk::plan_bands;
use crate::pipeline::input;
use crate::progress::ProgressCallback;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventLifecycleEvent, Viewport as ClipRect,
};
use chromiumoxide::handler::viewport::Viewport as EmulatedViewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::future::BoxFuture;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// CDP lifecycle event fired once a frame has had no network activity for 500 ms.
const NETWORK_IDLE_EVENT: &str = "networkIdle";

/// Largest of the body/document scroll and offset heights.
const MEASURE_HEIGHT_JS: &str = "(() => { \
    const b = document.body, h = document.documentElement; \
    return Math.max(b ? b.scrollHeight : 0, b ? b.offsetHeight : 0, \
                    h.clientHeight, h.scrollHeight, h.offsetHeight); })()";

/// [`ImageSource`] that drives a local headless Chrome.
pub struct LocalRenderer {
    viewport: Viewport,
    chunk_height: u32,
    jpeg_quality: u8,
    navigation_timeout: Duration,
    scroll_step_px: u32,
    scroll_interval: Duration,
    max_scroll_steps: u32,
    settle_delay: Duration,
    scroll_reset_delay: Duration,
    paint_delay: Duration,
    chrome_executable: Option<PathBuf>,
    chrome_args: Vec<String>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for LocalRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRenderer")
            .field("viewport", &self.viewport)
            .field("chunk_height", &self.chunk_height)
            .field("navigation_timeout", &self.navigation_timeout)
            .field("max_scroll_steps", &self.max_scroll_steps)
            .field("chrome_executable", &self.chrome_executable)
            .finish()
    }
}

impl LocalRenderer {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            viewport: config.viewport,
            chunk_height: config.chunk_height,
            jpeg_quality: config.jpeg_quality,
            navigation_timeout: config.navigation_timeout(),
            scroll_step_px: config.scroll_step_px.max(1),
            scroll_interval: Duration::from_millis(config.scroll_interval_ms),
            max_scroll_steps: config.max_scroll_steps,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            scroll_reset_delay: Duration::from_millis(config.scroll_reset_delay_ms),
            paint_delay: Duration::from_millis(config.paint_delay_ms),
            chrome_executable: config.chrome_executable.clone(),
            chrome_args: config.chrome_args.clone(),
            progress: config.progress_callback.clone(),
        }
    }

    fn chrome_path(&self) -> Result<PathBuf, CaptureError> {
        if let Some(ref path) = self.chrome_executable {
            return Ok(path.clone());
        }
        chrome_locate::locate_chrome().map_err(|e| CaptureError::LaunchFailed(e.to_string()))
    }

    async fn launch(&self) -> Result<BrowserSession, CaptureError> {
        let chrome = self.chrome_path()?;
        debug!("Launching Chrome: {}", chrome.display());

        let mut config = BrowserConfig::builder()
            .chrome_executable(chrome)
            .window_size(self.viewport.width, self.viewport.height)
            .viewport(EmulatedViewport {
                width: self.viewport.width,
                height: self.viewport.height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .no_sandbox()
            .arg("--disable-setuid-sandbox")
            .arg("--hide-scrollbars");
        for arg in &self.chrome_args {
            config = config.arg(arg.as_str());
        }
        let config = config.build().map_err(CaptureError::LaunchFailed)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| CaptureError::LaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler event error: {}", e);
                }
            }
        });

        let mut session = BrowserSession::new(browser, handler_task);
        let page = session
            .browser()?
            .new_page("about:blank")
            .await
            .map_err(|e| CaptureError::LaunchFailed(format!("could not open a page: {e}")))?;
        session.page = Some(page);
        Ok(session)
    }

    async fn navigate(&self, page: &Page, url: &str, budget: Duration) -> Result<(), CaptureError> {
        let bound = self.navigation_timeout.min(budget);
        info!("Navigating to {} (timeout {}s)", url, bound.as_secs());

        let navigation = async {
            // Subscribe first: a fast page can go idle before goto returns.
            let mut lifecycle = page.event_listener::<EventLifecycleEvent>().await?;
            let main_frame = page.mainframe().await?;
            page.goto(url).await?;
            while let Some(event) = lifecycle.next().await {
                let in_main_frame = main_frame.as_ref().map_or(true, |id| *id == event.frame_id);
                if in_main_frame && event.name == NETWORK_IDLE_EVENT {
                    debug!("Network idle on {}", url);
                    break;
                }
            }
            Ok::<_, chromiumoxide::error::CdpError>(())
        };

        match tokio::time::timeout(bound, navigation).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CaptureError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(CaptureError::NavigationTimeout {
                url: url.to_string(),
                secs: bound.as_secs().max(1),
            }),
        }
    }

    /// Scroll down until the scrolled distance reaches the body's scroll
    /// height, or the step guard trips.
    async fn lazy_scroll(&self, page: &Page) -> Result<(), CaptureError> {
        let step = self.scroll_step_px;
        let script = format!(
            "(() => {{ const h = document.body ? document.body.scrollHeight : 0; \
             window.scrollBy(0, {step}); return h; }})()"
        );

        let mut scrolled: u64 = 0;
        for n in 0..self.max_scroll_steps {
            let scroll_height = evaluate_number(page, &script, "lazy-load scroll").await?;
            scrolled += u64::from(step);
            if scrolled as f64 >= scroll_height {
                debug!("Lazy-load scroll finished after {} steps ({}px)", n + 1, scrolled);
                return Ok(());
            }
            sleep(self.scroll_interval).await;
        }

        warn!(
            "Lazy-load scroll guard hit after {} steps ({}px); capturing current height",
            self.max_scroll_steps, scrolled
        );
        Ok(())
    }

    async fn capture_bands(
        &self,
        page: &Page,
        full_height: u32,
    ) -> Result<Vec<CapturedBand>, CaptureError> {
        let plan = plan_bands(full_height, self.chunk_height);
        let total = plan.len();
        let mut bands = Vec::with_capacity(total);

        for band in plan {
            evaluate_number(
                page,
                &format!("(() => {{ window.scrollTo(0, {}); return window.scrollY; }})()", band.offset_y),
                "band scroll",
            )
            .await?;
            sleep(self.paint_delay).await;

            let params = ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Jpeg)
                .quality(i64::from(self.jpeg_quality))
                .clip(ClipRect {
                    x: 0.0,
                    y: f64::from(band.offset_y),
                    width: f64::from(self.viewport.width),
                    height: f64::from(band.height),
                    scale: 1.0,
                })
                .capture_beyond_viewport(true)
                .build();

            let pixels = page
                .screenshot(params)
                .await
                .map_err(|e| CaptureError::BrowserCommand {
                    step: "band screenshot",
                    reason: e.to_string(),
                })?;
            debug!(
                "Band {}/{}: y={} h={} → {} bytes",
                band.index + 1,
                total,
                band.offset_y,
                band.height,
                pixels.len()
            );

            if let Some(ref cb) = self.progress {
                cb.on_band_captured(band.index, total);
            }
            bands.push(CapturedBand {
                index: band.index,
                offset_y: band.offset_y,
                height: band.height,
                pixels,
            });
        }
        Ok(bands)
    }

    async fn run(&self, url: &str, budget: Duration) -> Result<Capture, CaptureError> {
        let target = input::parse_target_url(url)?;
        let started = Instant::now();

        let session = self.launch().await?;
        let page = session.page()?;

        self.navigate(page, target.as_str(), budget.saturating_sub(started.elapsed()))
            .await?;
        self.lazy_scroll(page).await?;
        sleep(self.settle_delay).await;

        let measured = evaluate_number(page, MEASURE_HEIGHT_JS, "height measurement").await?;
        if !measured.is_finite() || measured < 1.0 {
            return Err(CaptureError::EmptyPage(format!(
                "document height {measured} for '{target}'"
            )));
        }
        let full_height = measured.ceil().min(f64::from(u32::MAX)) as u32;
        info!("Measured document height: {}px", full_height);

        evaluate_number(
            page,
            "(() => { window.scrollTo(0, 0); return window.scrollY; })()",
            "scroll reset",
        )
        .await?;
        sleep(self.scroll_reset_delay).await;

        let bands = self.capture_bands(page, full_height).await?;
        session.close().await;

        info!(
            "Captured {} bands of {} in {}ms",
            bands.len(),
            target,
            started.elapsed().as_millis()
        );
        Ok(Capture::Bands {
            width: self.viewport.width,
            full_height,
            bands,
        })
    }
}

impl ImageSource for LocalRenderer {
    fn name(&self) -> &'static str {
        "local-renderer"
    }

    fn capture<'a>(
        &'a self,
        url: &'a str,
        budget: Duration,
    ) -> BoxFuture<'a, Result<Capture, CaptureError>> {
        Box::pin(self.run(url, budget))
    }
}

async fn evaluate_number(page: &Page, script: &str, step: &'static str) -> Result<f64, CaptureError> {
    let command_failed = |reason: String| CaptureError::BrowserCommand { step, reason };
    page.evaluate_expression(script)
        .await
        .map_err(|e| command_failed(e.to_string()))?
        .into_value::<f64>()
        .map_err(|e| command_failed(format!("unexpected script result: {e}")))
}

// ── Session guard ────────────────────────────────────────────────────────

/// RAII guard for a launched browser.
///
/// chromiumoxide's `Browser` needs an async `close()` to shut Chrome down
/// cleanly, which `Drop` cannot await. The guard therefore keeps the
/// runtime handle it was created on and, when dropped without an explicit
/// [`close`](Self::close), spawns the shutdown there.
pub struct BrowserSession {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: Option<Page>,
    runtime_handle: tokio::runtime::Handle,
}

impl BrowserSession {
    fn new(browser: Browser, handler: JoinHandle<()>) -> Self {
        Self {
            browser: Some(browser),
            handler: Some(handler),
            page: None,
            runtime_handle: tokio::runtime::Handle::current(),
        }
    }

    fn browser(&self) -> Result<&Browser, CaptureError> {
        self.browser
            .as_ref()
            .ok_or_else(|| CaptureError::LaunchFailed("browser session already closed".into()))
    }

    fn page(&self) -> Result<&Page, CaptureError> {
        self.page.as_ref().ok_or(CaptureError::BrowserCommand {
            step: "page access",
            reason: "no page open".into(),
        })
    }

    /// Close the page and the browser, then stop the CDP handler.
    pub async fn close(mut self) {
        let page = self.page.take();
        let browser = self.browser.take();
        let handler = self.handler.take();
        shutdown(page, browser, handler).await;
        debug!("Browser session closed");
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        let page = self.page.take();
        let browser = self.browser.take();
        let handler = self.handler.take();
        if browser.is_none() && handler.is_none() {
            return;
        }
        debug!("Browser session dropped without close; cleaning up in background");
        self.runtime_handle.spawn(shutdown(page, browser, handler));
    }
}

async fn shutdown(page: Option<Page>, browser: Option<Browser>, handler: Option<JoinHandle<()>>) {
    if let Some(page) = page {
        if let Err(e) = page.close().await {
            debug!("Page close failed: {}", e);
        }
    }
    if let Some(mut browser) = browser {
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        if let Err(e) = browser.wait().await {
            warn!("Failed to reap browser process: {}", e);
        }
    }
    if let Some(handler) = handler {
        handler.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_copies_config() {
        let config = AuditConfig::builder()
            .viewport(1024, 768)
            .chunk_height(900)
            .navigation_timeout_secs(15)
            .chrome_executable("/opt/chrome/chrome")
            .chrome_arg("--proxy-server=127.0.0.1:3128")
            .build()
            .unwrap();
        let renderer = LocalRenderer::from_config(&config);
        assert_eq!(renderer.chrome_args, vec!["--proxy-server=127.0.0.1:3128".to_string()]);
        assert_eq!(renderer.viewport, Viewport { width: 1024, height: 768 });
        assert_eq!(renderer.chunk_height, 900);
        assert_eq!(renderer.navigation_timeout, Duration::from_secs(15));
        assert_eq!(renderer.chrome_path().unwrap(), PathBuf::from("/opt/chrome/chrome"));
        assert_eq!(renderer.name(), "local-renderer");
    }

    #[test]
    fn measure_script_covers_all_heights() {
        for prop in ["scrollHeight", "offsetHeight", "clientHeight"] {
            assert!(MEASURE_HEIGHT_JS.contains(prop));
        }
    }

    #[tokio::test]
    async fn invalid_url_fails_before_launch() {
        let renderer = LocalRenderer::from_config(
            &AuditConfig::builder()
                .chrome_executable("/nonexistent/chrome")
                .build()
                .unwrap(),
        );
        let err = renderer
            .capture("file:///etc/passwd", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn missing_executable_is_launch_failure() {
        let renderer = LocalRenderer::from_config(
            &AuditConfig::builder()
                .chrome_executable("/nonexistent/chrome")
                .build()
                .unwrap(),
        );
        let err = renderer
            .capture("https://example.com", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::LaunchFailed(_)), "{err:?}");
    }

    #[tokio::test]
    #[ignore = "requires a local Chrome/Chromium"]
    async fn captures_a_real_page() {
        let renderer = LocalRenderer::from_config(&AuditConfig::default());
        let capture = renderer
            .capture("https://example.com", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(capture.width(), 1280);
        assert!(capture.height() > 0);
    }
}
