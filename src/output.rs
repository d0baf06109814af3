//! Result types returned by a successful audit run.

use serde::{Deserialize, Serialize};

/// The assembled report plus run statistics.
#[derive(Debug, Clone)]
pub struct AuditOutput {
    /// The URL that was captured, as supplied by the caller.
    pub source_url: String,
    /// The serialised `.docx` payload.
    pub document: Vec<u8>,
    pub stats: AuditStats,
}

/// Per-run statistics, serialisable for `--json` output and logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditStats {
    /// Name of the image source that produced the capture.
    pub strategy: String,
    /// Width of the captured page in pixels (scale basis for the layout).
    pub source_width: u32,
    /// Full height of the captured page in pixels.
    pub source_height: u32,
    pub chunk_count: usize,
    pub document_bytes: usize,
    pub capture_ms: u64,
    pub chunk_ms: u64,
    pub assemble_ms: u64,
    pub total_ms: u64,
}
