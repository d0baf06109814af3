//! Remote screenshot provider: capture through an HTTP rendering service.
//!
//! Two requests per capture:
//!
//! 1. `POST {endpoint}` with a JSON job description (full page, auto-scroll,
//!    viewport, JPEG, load-event wait plus settle delay). The provider
//!    answers `{"outputUrl": "..."}`.
//! 2. Resolve `outputUrl` to bytes. Absolute URLs are fetched as-is,
//!    relative ones are joined onto the endpoint, and `data:` URIs with a
//!    base64 payload are decoded in place.
//!
//! Both requests share the capture budget: the second only gets whatever
//! time the first left over.

use crate::config::{AuditConfig, Viewport};
use crate::error::{AuditError, CaptureError};
use crate::pipeline::capture::{Capture, ImageSource, RasterImage};
use crate::pipeline::input;
use base64::Engine;
use futures::future::BoxFuture;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Longest provider error body kept in [`CaptureError::ProviderStatus`].
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Job description sent to the provider.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptureJob<'a> {
    url: &'a str,
    full_page: bool,
    auto_scroll: bool,
    width: u32,
    height: u32,
    output_format: &'static str,
    wait_until: &'a str,
    settle_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptureJobResult {
    output_url: Option<String>,
}

/// [`ImageSource`] backed by a remote screenshot service.
pub struct RemoteProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    viewport: Viewport,
    wait_until: String,
    settle_delay_ms: u64,
}

impl std::fmt::Debug for RemoteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProvider")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("viewport", &self.viewport)
            .finish()
    }
}

impl RemoteProvider {
    pub fn from_config(config: &AuditConfig) -> Result<Self, AuditError> {
        let raw = config
            .provider
            .endpoint
            .as_deref()
            .ok_or(AuditError::Capture(CaptureError::ProviderNotConfigured))?;
        let endpoint = Url::parse(raw).map_err(|e| {
            AuditError::InvalidConfig(format!("Provider endpoint is not a valid URL: '{raw}': {e}"))
        })?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("webpage-audit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuditError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.provider.api_key.clone(),
            viewport: config.viewport,
            wait_until: config.provider.wait_until.clone(),
            settle_delay_ms: config.provider.settle_delay_ms,
        })
    }

    async fn request_render(&self, url: &str, budget: Duration) -> Result<String, CaptureError> {
        let job = CaptureJob {
            url,
            full_page: true,
            auto_scroll: true,
            width: self.viewport.width,
            height: self.viewport.height,
            output_format: "jpeg",
            wait_until: &self.wait_until,
            settle_delay_ms: self.settle_delay_ms,
        };

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .timeout(budget)
            .json(&job);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| request_error(e, budget))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CaptureError::ProviderStatus {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        let result: CaptureJobResult = response.json().await.map_err(|e| {
            if e.is_timeout() {
                request_error(e, budget)
            } else {
                CaptureError::ProviderRequest(format!("unreadable provider response: {e}"))
            }
        })?;

        match result.output_url {
            Some(output) if !output.trim().is_empty() => Ok(output.trim().to_string()),
            _ => Err(CaptureError::MissingOutputUrl),
        }
    }

    async fn fetch_image(&self, output_url: &str, budget: Duration) -> Result<Vec<u8>, CaptureError> {
        if output_url.starts_with("data:") {
            return decode_data_uri(output_url);
        }

        let image_url = self.endpoint.join(output_url).map_err(|e| CaptureError::ImageFetch {
            url: output_url.to_string(),
            reason: e.to_string(),
        })?;
        let fetch_failed = |reason: String| CaptureError::ImageFetch {
            url: image_url.to_string(),
            reason,
        };

        debug!("Fetching rendered image: {}", image_url);
        let response = self
            .client
            .get(image_url.clone())
            .timeout(budget)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    request_error(e, budget)
                } else {
                    fetch_failed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(fetch_failed(format!("HTTP {}", response.status())));
        }

        let bytes = response.bytes().await.map_err(|e| fetch_failed(e.to_string()))?;
        if bytes.is_empty() {
            return Err(fetch_failed("empty response body".into()));
        }
        Ok(bytes.to_vec())
    }
}

impl ImageSource for RemoteProvider {
    fn name(&self) -> &'static str {
        "remote-provider"
    }

    fn capture<'a>(
        &'a self,
        url: &'a str,
        budget: Duration,
    ) -> BoxFuture<'a, Result<Capture, CaptureError>> {
        Box::pin(async move {
            let target = input::parse_target_url(url)?;
            let started = Instant::now();

            info!("Requesting render of {} from {}", target, self.endpoint);
            let output_url = self.request_render(target.as_str(), budget).await?;
            debug!("Provider returned outputUrl ({} chars)", output_url.len());

            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(CaptureError::ProviderTimeout {
                    secs: budget.as_secs(),
                });
            }
            let bytes = self.fetch_image(&output_url, remaining).await?;

            let image = RasterImage::decode(bytes)?;
            info!(
                "Provider capture complete: {}x{} in {}ms",
                image.width(),
                image.height(),
                started.elapsed().as_millis()
            );
            Ok(Capture::FullPage(image))
        })
    }
}

fn request_error(err: reqwest::Error, budget: Duration) -> CaptureError {
    if err.is_timeout() {
        CaptureError::ProviderTimeout {
            secs: budget.as_secs().max(1),
        }
    } else {
        CaptureError::ProviderRequest(err.to_string())
    }
}

/// Decode a `data:<mime>;base64,<payload>` URI.
fn decode_data_uri(uri: &str) -> Result<Vec<u8>, CaptureError> {
    let fail = |reason: &str| CaptureError::ImageFetch {
        url: truncate(uri, 64),
        reason: reason.to_string(),
    };

    let rest = uri.strip_prefix("data:").ok_or_else(|| fail("not a data URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| fail("data URI has no payload"))?;
    if !header.ends_with(";base64") {
        return Err(fail("only base64 data URIs are supported"));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| fail(&format!("bad base64 payload: {e}")))?;
    if bytes.is_empty() {
        return Err(fail("data URI payload is empty"));
    }
    Ok(bytes)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureStrategy;

    #[test]
    fn job_serialises_camel_case() {
        let job = CaptureJob {
            url: "https://example.com/",
            full_page: true,
            auto_scroll: true,
            width: 1280,
            height: 800,
            output_format: "jpeg",
            wait_until: "load",
            settle_delay_ms: 1000,
        };
        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["fullPage"], true);
        assert_eq!(v["autoScroll"], true);
        assert_eq!(v["outputFormat"], "jpeg");
        assert_eq!(v["waitUntil"], "load");
        assert_eq!(v["settleDelayMs"], 1000);
        assert_eq!(v["width"], 1280);
    }

    #[test]
    fn result_tolerates_missing_output_url() {
        let r: CaptureJobResult = serde_json::from_str(r#"{"status":"done"}"#).unwrap();
        assert!(r.output_url.is_none());
    }

    #[test]
    fn data_uri_decodes() {
        let bytes = decode_data_uri("data:image/jpeg;base64,/9j/4AAQ").unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn data_uri_rejects_non_base64() {
        let err = decode_data_uri("data:image/svg+xml,<svg/>").unwrap_err();
        assert!(err.to_string().contains("base64"));
    }

    #[test]
    fn data_uri_rejects_empty_payload() {
        assert!(decode_data_uri("data:image/jpeg;base64,").is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé…");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn from_config_requires_endpoint() {
        let config = AuditConfig::default();
        assert!(matches!(
            RemoteProvider::from_config(&config),
            Err(AuditError::Capture(CaptureError::ProviderNotConfigured))
        ));
    }

    #[test]
    fn from_config_reads_provider_settings() {
        let config = AuditConfig::builder()
            .strategy(CaptureStrategy::RemoteProvider)
            .provider_endpoint("https://shots.example.com/v1/capture")
            .provider_api_key("secret")
            .build()
            .unwrap();
        let provider = RemoteProvider::from_config(&config).unwrap();
        assert_eq!(provider.endpoint.host_str(), Some("shots.example.com"));
        assert_eq!(provider.wait_until, "load");
        assert!(!format!("{provider:?}").contains("secret"));
    }

    #[test]
    fn relative_output_url_joins_endpoint() {
        let endpoint = Url::parse("https://shots.example.com/v1/capture").unwrap();
        assert_eq!(
            endpoint.join("/renders/abc.jpg").unwrap().as_str(),
            "https://shots.example.com/renders/abc.jpg"
        );
        assert_eq!(
            endpoint.join("https://cdn.example.net/x.jpg").unwrap().as_str(),
            "https://cdn.example.net/x.jpg"
        );
    }
}
