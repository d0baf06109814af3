//! Input validation: normalise a user-supplied target into an absolute URL.
//!
//! Both image sources hand the URL to something that will happily try to
//! load `file:///etc/passwd` or `chrome://settings`, so only absolute
//! `http`/`https` URLs with a host are accepted. Validation happens once
//! in the controller before any browser or provider is touched; the
//! sources re-run it so they are safe to call directly.

use crate::error::CaptureError;
use reqwest::Url;
use tracing::debug;

/// Parse and validate a capture target.
///
/// Leading and trailing whitespace is ignored. The returned [`Url`] is
/// normalised by the parser (lower-case scheme and host, default port
/// dropped).
pub fn parse_target_url(input: &str) -> Result<Url, CaptureError> {
    let trimmed = input.trim();
    let invalid = |reason: &str| CaptureError::InvalidUrl {
        url: trimmed.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("URL is empty"));
    }

    let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("URL has no host"));
    }

    debug!("Validated target URL: {}", url);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert_eq!(
            parse_target_url("https://example.com").unwrap().as_str(),
            "https://example.com/"
        );
        assert!(parse_target_url("http://localhost:3000/a?b=c").is_ok());
    }

    #[test]
    fn trims_whitespace() {
        let url = parse_target_url("  https://example.com/x \n").unwrap();
        assert_eq!(url.path(), "/x");
    }

    #[test]
    fn rejects_other_schemes() {
        for bad in ["file:///etc/passwd", "chrome://settings", "javascript:alert(1)"] {
            let err = parse_target_url(bad).unwrap_err();
            assert!(matches!(err, CaptureError::InvalidUrl { .. }), "{bad}");
        }
    }

    #[test]
    fn rejects_relative_and_empty() {
        assert!(parse_target_url("example.com").is_err());
        assert!(parse_target_url("/just/a/path").is_err());
        assert!(parse_target_url("   ").is_err());
    }
}
