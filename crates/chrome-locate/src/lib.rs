//! # chrome-locate
//!
//! Find a Chrome or Chromium executable that a CDP client can launch, so
//! that users of `webpage-audit` do not need to pass `--chrome-path` on every
//! run.
//!
//! ## How it works
//!
//! On first call to [`locate_chrome`]:
//!
//! 1. Honours `CHROME_PATH` if it points to an existing file.
//! 2. Checks the well-known install locations for the current platform,
//!    system-wide first and then per-user.
//! 3. Searches every directory on `PATH` for the usual binary names.
//!
//! The first hit is cached for the lifetime of the process.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chrome_locate::{is_chrome_available, locate_chrome};
//!
//! if is_chrome_available() {
//!     let path = locate_chrome().expect("checked above");
//!     println!("Chrome: {}", path.display());
//! }
//! ```
//!
//! ## Platform support
//!
//! | OS      | Locations checked                                              |
//! |---------|----------------------------------------------------------------|
//! | macOS   | `/Applications/*.app`, `~/Applications/*.app`                  |
//! | Linux   | `/usr/bin`, `/usr/local/bin`, `/snap/bin`, `/opt/google/chrome` |
//! | Windows | `%ProgramFiles%`, `%ProgramFiles(x86)%`, `%LOCALAPPDATA%`      |
//!
//! ## Environment variable overrides
//!
//! - `CHROME_PATH` — path to a Chrome/Chromium executable; skips discovery.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Environment variable that overrides discovery.
pub const CHROME_PATH_ENV: &str = "CHROME_PATH";

/// Binary names searched on `PATH`, in preference order.
pub const PATH_BINARY_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "chrome.exe",
    "msedge",
];

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by chrome-locate operations.
#[derive(Error, Debug)]
pub enum ChromeLocateError {
    /// `CHROME_PATH` is set but does not point to a file.
    #[error("CHROME_PATH '{path}' does not exist")]
    EnvPathMissing { path: PathBuf },

    /// Nothing was found in any known location or on `PATH`.
    #[error(
        "No Chrome or Chromium executable found on {os}.\n\
Install Chrome/Chromium or set CHROME_PATH=/path/to/chrome."
    )]
    NotFound { os: String },
}

// ── Thread-safe singleton path cache ─────────────────────────────────────────

static RESOLVED_PATH: OnceLock<PathBuf> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns the path of a usable Chrome/Chromium executable.
///
/// Resolution order: `CHROME_PATH`, platform install locations, `PATH`.
/// A `CHROME_PATH` that points nowhere is an error rather than a silent
/// fallback, since the user asked for that specific binary.
///
/// # Thread safety
///
/// Safe to call from multiple threads; discovery runs at most once per
/// process unless it fails.
pub fn locate_chrome() -> Result<PathBuf, ChromeLocateError> {
    if let Some(path) = RESOLVED_PATH.get() {
        return Ok(path.clone());
    }

    let path = resolve()?;
    let _ = RESOLVED_PATH.set(path.clone());
    Ok(path)
}

/// Returns `true` if [`locate_chrome`] would succeed.
pub fn is_chrome_available() -> bool {
    locate_chrome().is_ok()
}

/// Well-known install locations for the current platform, in the order they
/// are checked. Paths are returned whether or not they exist.
pub fn candidate_paths() -> Vec<PathBuf> {
    platform_candidates(std::env::consts::OS)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn resolve() -> Result<PathBuf, ChromeLocateError> {
    if let Ok(env_path) = std::env::var(CHROME_PATH_ENV) {
        if !env_path.is_empty() {
            let p = PathBuf::from(env_path);
            if p.is_file() {
                return Ok(p);
            }
            return Err(ChromeLocateError::EnvPathMissing { path: p });
        }
    }

    if let Some(found) = candidate_paths().into_iter().find(|p| p.is_file()) {
        return Ok(found);
    }

    if let Some(found) = search_path(std::env::var_os("PATH").as_deref()) {
        return Ok(found);
    }

    Err(ChromeLocateError::NotFound {
        os: std::env::consts::OS.to_string(),
    })
}

fn platform_candidates(os: &str) -> Vec<PathBuf> {
    match os {
        "macos" => {
            let bundles = [
                "Google Chrome.app/Contents/MacOS/Google Chrome",
                "Chromium.app/Contents/MacOS/Chromium",
                "Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
            ];
            let mut out: Vec<PathBuf> = bundles
                .iter()
                .map(|b| Path::new("/Applications").join(b))
                .collect();
            if let Some(home) = dirs::home_dir() {
                out.extend(bundles.iter().map(|b| home.join("Applications").join(b)));
            }
            out
        }
        "windows" => {
            let rel = [
                r"Google\Chrome\Application\chrome.exe",
                r"Chromium\Application\chrome.exe",
                r"Microsoft\Edge\Application\msedge.exe",
            ];
            let mut roots: Vec<PathBuf> = ["ProgramFiles", "ProgramFiles(x86)"]
                .iter()
                .filter_map(|var| std::env::var_os(var).map(PathBuf::from))
                .collect();
            if let Some(local) = dirs::data_local_dir() {
                roots.push(local);
            }
            roots
                .iter()
                .flat_map(|root| rel.iter().map(move |r| root.join(r)))
                .collect()
        }
        _ => {
            let mut out: Vec<PathBuf> = [
                "/usr/bin/google-chrome",
                "/usr/bin/google-chrome-stable",
                "/usr/bin/chromium",
                "/usr/bin/chromium-browser",
                "/usr/local/bin/chromium",
                "/snap/bin/chromium",
                "/opt/google/chrome/chrome",
            ]
            .iter()
            .map(PathBuf::from)
            .collect();
            if let Some(home) = dirs::home_dir() {
                out.push(home.join(".local/bin/chromium"));
            }
            out
        }
    }
}

/// Searches each directory of a `PATH`-style value for a known binary name.
fn search_path(path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    let path_var = path_var?;
    std::env::split_paths(path_var).find_map(|dir| {
        PATH_BINARY_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_are_nonempty_for_every_platform() {
        for os in ["macos", "linux", "windows"] {
            let c = platform_candidates(os);
            // Windows roots come from env vars, which may be absent in CI.
            if os != "windows" {
                assert!(!c.is_empty(), "{os} should have candidates");
            }
        }
    }

    #[test]
    fn candidates_are_deterministic() {
        assert_eq!(candidate_paths(), candidate_paths());
    }

    #[test]
    fn linux_candidates_include_system_chromium() {
        let c = platform_candidates("linux");
        assert!(c.contains(&PathBuf::from("/usr/bin/chromium")));
    }

    #[test]
    fn search_path_finds_known_binary() {
        let dir = std::env::temp_dir().join(format!("chrome-locate-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bin = dir.join("chromium");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();

        let path_var = std::env::join_paths([dir.clone()]).unwrap();
        let found = search_path(Some(&path_var));
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(found, Some(bin));
    }

    #[test]
    fn search_path_none_when_unset() {
        assert_eq!(search_path(None), None);
    }

    #[test]
    fn not_found_message_mentions_override() {
        let e = ChromeLocateError::NotFound { os: "linux".into() };
        assert!(e.to_string().contains("CHROME_PATH"));
    }
}
