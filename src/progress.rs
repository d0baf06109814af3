//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn AuditProgressCallback>`] via
//! [`crate::config::AuditConfigBuilder::progress_callback`] to observe a run
//! as it moves through `Capturing → Chunking → Assembling → Done`.
//!
//! These are real events emitted by the controller and the image sources.
//! Nothing in the pipeline reads them back, so an observer can never change
//! control flow.
//!
//! # Example
//!
//! ```rust
//! use webpage_audit::{AuditConfig, AuditProgressCallback, PipelineStage};
//! use std::sync::Arc;
//!
//! struct StageLogger;
//!
//! impl AuditProgressCallback for StageLogger {
//!     fn on_stage(&self, stage: PipelineStage) {
//!         eprintln!("stage: {stage}");
//!     }
//! }
//!
//! let config = AuditConfig::builder()
//!     .progress_callback(Arc::new(StageLogger))
//!     .build()
//!     .unwrap();
//! ```

use crate::audit::PipelineStage;
use crate::output::AuditStats;
use std::sync::Arc;

/// Called by the pipeline as a run progresses.
///
/// Implementations must be `Send + Sync`: the HTTP server runs many audits
/// concurrently and may share one callback between them. All methods have
/// default no-op implementations.
pub trait AuditProgressCallback: Send + Sync {
    /// Called on every state transition, including `Failed`.
    fn on_stage(&self, stage: PipelineStage) {
        let _ = stage;
    }

    /// Called by the local renderer after each band screenshot.
    ///
    /// # Arguments
    /// * `index` — 0-based band index
    /// * `total` — number of bands planned for this page
    fn on_band_captured(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called after each chunk is cut from a full-page capture and
    /// re-encoded. Runs on the blocking pool.
    fn on_chunk_encoded(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called once when the document has been serialised.
    fn on_audit_complete(&self, stats: &AuditStats) {
        let _ = stats;
    }

    /// Called once when the run fails, with the error's display string.
    fn on_audit_failed(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AuditProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AuditConfig`].
pub type ProgressCallback = Arc<dyn AuditProgressCallback>;
