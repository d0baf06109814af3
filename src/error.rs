//! Error types for the webpage-audit library.
//!
//! Two error types reflect the two layers of the pipeline:
//!
//! * [`CaptureError`] — **Stage-local**: an [`crate::pipeline::capture::ImageSource`]
//!   could not produce a screenshot (browser launch, navigation, provider
//!   HTTP failure, unresolvable image reference). Capture is all-or-nothing,
//!   so there is no partial result to attach it to.
//!
//! * [`AuditError`] — **Pipeline-level**: returned by [`crate::audit::run_audit`].
//!   Every stage error is converted into this type exactly once, in the
//!   controller, and [`AuditError::to_body`] is the only place that shapes
//!   it for the HTTP boundary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single capture attempt.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The target is not an absolute http(s) URL.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Chrome could not be found or started, or the CDP connection failed.
    #[error("Failed to launch browser: {0}\nSet CHROME_PATH or pass --chrome-path.")]
    LaunchFailed(String),

    /// Navigation did not finish within the configured bound.
    #[error("Navigation timeout after {secs}s for '{url}'")]
    NavigationTimeout { url: String, secs: u64 },

    /// The browser reported a navigation error (DNS, TLS, refused, …).
    #[error("Navigation to '{url}' failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    /// A script evaluation or screenshot command failed mid-capture.
    #[error("Browser command failed during {step}: {reason}")]
    BrowserCommand { step: &'static str, reason: String },

    /// Remote strategy selected but no provider endpoint configured.
    #[error("Screenshot provider is not configured.\nSet AUDIT_PROVIDER_ENDPOINT or pass --provider-endpoint.")]
    ProviderNotConfigured,

    /// The screenshot provider did not answer within the budget.
    #[error("Screenshot provider timeout after {secs}s")]
    ProviderTimeout { secs: u64 },

    /// The provider request could not be sent or its body could not be read.
    #[error("Screenshot provider request failed: {0}")]
    ProviderRequest(String),

    /// The provider answered with a non-success HTTP status.
    #[error("Screenshot provider returned HTTP {status}: {body}")]
    ProviderStatus { status: u16, body: String },

    /// The provider response did not contain a usable `outputUrl`.
    #[error("Screenshot provider response has no outputUrl")]
    MissingOutputUrl,

    /// The rendered image reference could not be resolved to bytes.
    #[error("Failed to fetch rendered image '{url}': {reason}")]
    ImageFetch { url: String, reason: String },

    /// The returned bytes are not a decodable raster image.
    #[error("Captured image is not decodable: {0}")]
    UndecodableImage(String),

    /// The page reported a zero or negative document height.
    #[error("Page reported an unusable document height: {0}")]
    EmptyPage(String),
}

/// All errors returned by a pipeline run.
#[derive(Debug, Error)]
pub enum AuditError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The request URL is missing or not an absolute http(s) URL.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// The image source failed.
    #[error("Capture failed: {0}")]
    Capture(CaptureError),

    /// Capture data is malformed (zero dimension, undecodable bytes).
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// The chunker produced no chunks, so there is nothing to assemble.
    #[error("No image chunks to assemble; refusing to build an empty report")]
    EmptyInput,

    /// The document could not be serialised.
    #[error("Document assembly failed: {0}")]
    Assembly(String),

    /// The whole run exceeded its wall-clock budget.
    #[error("Audit deadline exceeded: timeout after {secs}s")]
    DeadlineExceeded { secs: u64 },

    /// A blocking stage noticed its run was abandoned and stopped early.
    #[error("Audit cancelled during {stage}")]
    Cancelled { stage: &'static str },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output document.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CaptureError> for AuditError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::InvalidUrl { url, reason } => AuditError::InvalidUrl { url, reason },
            CaptureError::UndecodableImage(detail) | CaptureError::EmptyPage(detail) => {
                AuditError::InvalidImage(detail)
            }
            other => AuditError::Capture(other),
        }
    }
}

/// Externally visible error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Capture,
    InvalidImage,
    EmptyInput,
    DeadlineExceeded,
    Internal,
}

/// JSON error body returned at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl AuditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuditError::InvalidUrl { .. } => ErrorKind::Input,
            AuditError::Capture(_) => ErrorKind::Capture,
            AuditError::InvalidImage(_) => ErrorKind::InvalidImage,
            AuditError::EmptyInput => ErrorKind::EmptyInput,
            AuditError::DeadlineExceeded { .. } | AuditError::Cancelled { .. } => {
                ErrorKind::DeadlineExceeded
            }
            AuditError::Assembly(_)
            | AuditError::OutputWriteFailed { .. }
            | AuditError::InvalidConfig(_)
            | AuditError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status for the boundary: 400 for bad input, 500 otherwise.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Input => 400,
            _ => 500,
        }
    }

    /// Whether re-running the whole pipeline could plausibly succeed.
    ///
    /// Capture failures and deadline overruns depend on the remote page and
    /// network; malformed images and bad input will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Capture | ErrorKind::DeadlineExceeded
        )
    }

    /// The boundary representation: a short summary plus the display string.
    /// Source chains and backtraces are never included.
    pub fn to_body(&self) -> ErrorBody {
        let error = match self.kind() {
            ErrorKind::Input => "Invalid URL",
            _ => "Failed to generate audit",
        };
        ErrorBody::new(error).with_details(self.to_string())
    }
}
