//! # webpage-audit
//!
//! Capture a full-page screenshot of a web page and package it as a
//! downloadable `.docx` audit report.
//!
//! ## Why this crate?
//!
//! A single screenshot of a long page is tens of thousands of pixels tall.
//! Word processors either refuse to embed it or shrink it to an unreadable
//! sliver. This crate cuts the page into bands of bounded height and stacks
//! them under a title at a fixed display width, so the report prints and
//! scrolls like the page itself.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL
//!  │
//!  ├─ 1. Input     validate as an absolute http(s) URL
//!  ├─ 2. Capture   headless Chrome (banded) or remote provider (one image)
//!  ├─ 3. Chunk     bands of ≤ chunk_height px (CPU-bound, spawn_blocking)
//!  ├─ 4. Assemble  title + scaled images → OOXML package
//!  └─ 5. Output    .docx bytes + per-stage timings
//! ```
//!
//! All three stages after input run under one deadline (60 s by default).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use webpage_audit::{run_audit, AuditConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Chrome is discovered from CHROME_PATH or the usual install locations
//!     let config = AuditConfig::default();
//!     let output = run_audit("https://example.com", &config).await?;
//!     std::fs::write("audit-report.docx", &output.document)?;
//!     eprintln!("{} chunks in {}ms", output.stats.chunk_count, output.stats.total_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `page-audit` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `local-renderer` | on | Headless Chrome capture via chromiumoxide |
//!
//! Without `local-renderer` only the remote provider strategy (or a
//! caller-supplied [`ImageSource`]) is available:
//! ```toml
//! webpage-audit = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Strategy
//!
//! | Strategy | Needs | Lazy content | Output |
//! |----------|-------|--------------|--------|
//! | `LocalRenderer`  | Chrome on the host | scrolled in locally | one JPEG per band |
//! | `RemoteProvider` | a screenshot API endpoint | provider auto-scroll | one tall image, split locally |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod audit;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use audit::{audit_to_file, run_audit, run_audit_sync, PipelineStage};
pub use config::{AuditConfig, AuditConfigBuilder, CaptureStrategy, ProviderConfig, Viewport};
pub use error::{AuditError, CaptureError, ErrorBody, ErrorKind};
pub use output::{AuditOutput, AuditStats};
pub use pipeline::capture::{Capture, CapturedBand, ImageSource, RasterImage};
pub use pipeline::chunk::ImageChunk;
pub use progress::{AuditProgressCallback, NoopProgressCallback, ProgressCallback};
pub use server::{attachment_filename, AuditServer, ShutdownHandle};
