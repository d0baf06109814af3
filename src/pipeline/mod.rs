//! Pipeline stages for page capture and report assembly.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap the capture backend without touching chunking or assembly.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ capture ──▶ chunk ──▶ docx
//! (URL)     (browser |   (bands)   (OOXML)
//!            provider)
//! ```
//!
//! 1. [`input`]    — validate the target as an absolute http(s) URL
//! 2. [`capture`]  — the [`capture::ImageSource`] trait and strategy selection;
//!    implemented by [`browser`] (local headless Chrome, feature
//!    `local-renderer`) and [`provider`] (remote screenshot service)
//! 3. [`chunk`]    — cut the capture into bounded-height bands; runs in
//!    `spawn_blocking` because decode/crop/encode is CPU-bound
//! 4. [`docx`]     — lay out the bands under a title and package them as `.docx`
//!
//! [`encode`] holds the JPEG encode/probe helpers shared by the stages.

#[cfg(feature = "local-renderer")]
pub mod browser;
pub mod capture;
pub mod chunk;
pub mod docx;
pub mod encode;
pub mod input;
pub mod provider;
