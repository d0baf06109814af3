//! Configuration types for a page audit.
//!
//! All pipeline behaviour is controlled through [`AuditConfig`], built via
//! its [`AuditConfigBuilder`]. One struct holds every knob so a server can
//! share a single `Arc<AuditConfig>` across concurrent runs without any run
//! being able to change another's settings.
//!
//! # Design choice: builder over constructor
//! Most callers only pick a strategy and maybe a chunk height; the builder
//! lets them rely on documented defaults for the other fifteen fields.

use crate::error::AuditError;
use crate::pipeline::capture::ImageSource;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a page audit run.
///
/// Built via [`AuditConfig::builder()`] or using [`AuditConfig::default()`].
///
/// # Example
/// ```rust
/// use webpage_audit::{AuditConfig, CaptureStrategy};
///
/// let config = AuditConfig::builder()
///     .strategy(CaptureStrategy::RemoteProvider)
///     .provider_endpoint("https://shots.example.com/v1/capture")
///     .chunk_height(1000)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_height, 1000);
/// ```
#[derive(Clone)]
pub struct AuditConfig {
    /// Which image source to use. Default: [`CaptureStrategy::LocalRenderer`].
    pub strategy: CaptureStrategy,

    /// Browser viewport in CSS pixels. Default: 1280×800.
    ///
    /// The viewport width is also the width of every captured band, and so
    /// the scale basis for the document layout.
    pub viewport: Viewport,

    /// Maximum height of one embedded image in pixels. Default: 1200.
    ///
    /// Word processors choke on single images tens of thousands of pixels
    /// tall; 1200 px keeps each image comfortably under one printed page
    /// once scaled to the display width.
    pub chunk_height: u32,

    /// Display width of every image in the document, in CSS pixels
    /// (96 DPI). Default: 600.0, which fits an A4 page with 1" margins.
    pub display_width: f64,

    /// JPEG quality for captured and re-encoded bands (1–100). Default: 80.
    pub jpeg_quality: u8,

    /// Navigation bound for the local renderer, in seconds. Default: 60.
    pub navigation_timeout_secs: u64,

    /// Overall wall-clock budget for capture + chunk + assemble, in seconds.
    /// Default: 60.
    pub deadline_secs: u64,

    /// Pixels scrolled per lazy-load step. Default: 100.
    pub scroll_step_px: u32,

    /// Pause between lazy-load scroll steps, in milliseconds. Default: 100.
    pub scroll_interval_ms: u64,

    /// Upper bound on lazy-load scroll steps. Default: 600 (60 000 px at
    /// the default step).
    ///
    /// Infinite-scroll pages grow as you scroll, so "scroll until the end"
    /// never terminates on them. Hitting this guard ends the lazy-load
    /// phase and captures whatever height the page reports at that point.
    pub max_scroll_steps: u32,

    /// Pause after the lazy-load scroll, before measuring, in ms. Default: 1000.
    pub settle_delay_ms: u64,

    /// Pause after scrolling back to the top, in ms. Default: 500.
    pub scroll_reset_delay_ms: u64,

    /// Pause after scrolling to each band before capturing it, in ms.
    /// Default: 200.
    pub paint_delay_ms: u64,

    /// Title font size in half-points (OOXML `w:sz`). Default: 32 (16 pt).
    pub title_size_half_points: u32,

    /// Explicit Chrome/Chromium executable. If None, `chrome-locate`
    /// discovers one.
    pub chrome_executable: Option<PathBuf>,

    /// Extra command-line switches passed to Chrome at launch.
    pub chrome_args: Vec<String>,

    /// Remote screenshot provider settings (strategy B).
    pub provider: ProviderConfig,

    /// Pre-constructed image source. Takes precedence over `strategy`.
    pub source: Option<Arc<dyn ImageSource>>,

    /// Optional observer for pipeline stage events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            strategy: CaptureStrategy::default(),
            viewport: Viewport::default(),
            chunk_height: 1200,
            display_width: 600.0,
            jpeg_quality: 80,
            navigation_timeout_secs: 60,
            deadline_secs: 60,
            scroll_step_px: 100,
            scroll_interval_ms: 100,
            max_scroll_steps: 600,
            settle_delay_ms: 1000,
            scroll_reset_delay_ms: 500,
            paint_delay_ms: 200,
            title_size_half_points: 32,
            chrome_executable: None,
            chrome_args: Vec::new(),
            provider: ProviderConfig::default(),
            source: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AuditConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditConfig")
            .field("strategy", &self.strategy)
            .field("viewport", &self.viewport)
            .field("chunk_height", &self.chunk_height)
            .field("display_width", &self.display_width)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("navigation_timeout_secs", &self.navigation_timeout_secs)
            .field("deadline_secs", &self.deadline_secs)
            .field("max_scroll_steps", &self.max_scroll_steps)
            .field("chrome_executable", &self.chrome_executable)
            .field("chrome_args", &self.chrome_args)
            .field("provider", &self.provider)
            .field("source", &self.source.as_ref().map(|s| s.name()))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn AuditProgressCallback>"),
            )
            .finish()
    }
}

impl AuditConfig {
    /// Create a new builder for `AuditConfig`.
    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

/// Builder for [`AuditConfig`].
#[derive(Debug)]
pub struct AuditConfigBuilder {
    config: AuditConfig,
}

impl AuditConfigBuilder {
    pub fn strategy(mut self, strategy: CaptureStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.viewport = Viewport { width, height };
        self
    }

    pub fn chunk_height(mut self, px: u32) -> Self {
        self.config.chunk_height = px;
        self
    }

    pub fn display_width(mut self, width: f64) -> Self {
        self.config.display_width = width;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn navigation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.navigation_timeout_secs = secs.max(1);
        self
    }

    pub fn deadline_secs(mut self, secs: u64) -> Self {
        self.config.deadline_secs = secs;
        self
    }

    pub fn scroll_step_px(mut self, px: u32) -> Self {
        self.config.scroll_step_px = px.max(1);
        self
    }

    pub fn scroll_interval_ms(mut self, ms: u64) -> Self {
        self.config.scroll_interval_ms = ms;
        self
    }

    pub fn max_scroll_steps(mut self, n: u32) -> Self {
        self.config.max_scroll_steps = n;
        self
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn scroll_reset_delay_ms(mut self, ms: u64) -> Self {
        self.config.scroll_reset_delay_ms = ms;
        self
    }

    pub fn paint_delay_ms(mut self, ms: u64) -> Self {
        self.config.paint_delay_ms = ms;
        self
    }

    pub fn title_size_half_points(mut self, size: u32) -> Self {
        self.config.title_size_half_points = size.max(2);
        self
    }

    pub fn chrome_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.chrome_executable = Some(path.into());
        self
    }

    /// Append one launch switch, e.g. `--proxy-server=host:port`.
    pub fn chrome_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.chrome_args.push(arg.into());
        self
    }

    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.config.provider = provider;
        self
    }

    pub fn provider_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.provider.endpoint = Some(endpoint.into());
        self
    }

    pub fn provider_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.provider.api_key = Some(key.into());
        self
    }

    pub fn source(mut self, source: Arc<dyn ImageSource>) -> Self {
        self.config.source = Some(source);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AuditConfig, AuditError> {
        let c = &self.config;
        if c.chunk_height == 0 {
            return Err(AuditError::InvalidConfig(
                "Chunk height must be ≥ 1".into(),
            ));
        }
        if !(c.display_width.is_finite() && c.display_width > 0.0) {
            return Err(AuditError::InvalidConfig(format!(
                "Display width must be a positive number, got {}",
                c.display_width
            )));
        }
        if c.viewport.width == 0 || c.viewport.height == 0 {
            return Err(AuditError::InvalidConfig(format!(
                "Viewport must be non-zero, got {}x{}",
                c.viewport.width, c.viewport.height
            )));
        }
        if c.deadline_secs == 0 {
            return Err(AuditError::InvalidConfig(
                "Deadline must be ≥ 1s".into(),
            ));
        }
        if c.source.is_none() && c.strategy == CaptureStrategy::RemoteProvider {
            match c.provider.endpoint.as_deref() {
                Some(ep) if reqwest::Url::parse(ep).is_ok() => {}
                Some(ep) => {
                    return Err(AuditError::InvalidConfig(format!(
                        "Provider endpoint is not a valid URL: '{ep}'"
                    )))
                }
                None => {
                    return Err(AuditError::InvalidConfig(
                        "Remote provider strategy requires a provider endpoint".into(),
                    ))
                }
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the full-page screenshot is obtained.
///
/// Selected per deployment: a server with Chrome installed uses the local
/// renderer, a slim container without a browser delegates to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureStrategy {
    /// Drive a local headless Chrome over CDP. (default)
    #[default]
    LocalRenderer,
    /// Ask a remote screenshot provider for a rendered image.
    RemoteProvider,
}

impl CaptureStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStrategy::LocalRenderer => "local-renderer",
            CaptureStrategy::RemoteProvider => "remote-provider",
        }
    }
}

/// Browser viewport size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// Settings for the remote screenshot provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Capture endpoint, e.g. `https://shots.example.com/v1/capture`.
    pub endpoint: Option<String>,
    /// Sent as `Authorization: Bearer <key>` when set.
    pub api_key: Option<String>,
    /// Delay the provider waits after the load event. Default: 1000.
    pub settle_delay_ms: u64,
    /// Page lifecycle event the provider waits for. Default: "load".
    pub wait_until: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            settle_delay_ms: 1000,
            wait_until: "load".to_string(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("settle_delay_ms", &self.settle_delay_ms)
            .field("wait_until", &self.wait_until)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = AuditConfig::default();
        assert_eq!(c.strategy, CaptureStrategy::LocalRenderer);
        assert_eq!(c.viewport, Viewport { width: 1280, height: 800 });
        assert_eq!(c.chunk_height, 1200);
        assert_eq!(c.display_width, 600.0);
        assert_eq!(c.jpeg_quality, 80);
        assert_eq!(c.deadline(), Duration::from_secs(60));
        assert_eq!(c.navigation_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn zero_chunk_height_rejected() {
        let err = AuditConfig::builder().chunk_height(0).build().unwrap_err();
        assert!(matches!(err, AuditError::InvalidConfig(_)));
    }

    #[test]
    fn non_finite_display_width_rejected() {
        assert!(AuditConfig::builder().display_width(f64::NAN).build().is_err());
        assert!(AuditConfig::builder().display_width(0.0).build().is_err());
    }

    #[test]
    fn remote_strategy_requires_endpoint() {
        let err = AuditConfig::builder()
            .strategy(CaptureStrategy::RemoteProvider)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("endpoint"));

        let ok = AuditConfig::builder()
            .strategy(CaptureStrategy::RemoteProvider)
            .provider_endpoint("http://127.0.0.1:9/capture")
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn jpeg_quality_is_clamped() {
        let c = AuditConfig::builder().jpeg_quality(0).build().unwrap();
        assert_eq!(c.jpeg_quality, 1);
        let c = AuditConfig::builder().jpeg_quality(255).build().unwrap();
        assert_eq!(c.jpeg_quality, 100);
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = AuditConfig::builder()
            .provider_api_key("sk-secret")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn strategy_serde_is_kebab_case() {
        let s = serde_json::to_string(&CaptureStrategy::RemoteProvider).unwrap();
        assert_eq!(s, "\"remote-provider\"");
    }
}
