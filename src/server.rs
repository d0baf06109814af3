//! HTTP boundary: `POST /api/generate-audit`.
//!
//! ## Request
//!
//! ```json
//! { "url": "https://example.com", "reportName": "Homepage audit" }
//! ```
//!
//! ## Responses
//!
//! | Status | Body | When |
//! |--------|------|------|
//! | 200 | `.docx` bytes, `Content-Disposition: attachment` | success |
//! | 400 | `{"error":"Invalid request body","details":…}` | body is not the JSON above |
//! | 400 | `{"error":"Invalid request body","details":…}` | body over [`MAX_BODY_BYTES`] |
//! | 400 | `{"error":"URL is required"}` | `url` missing or blank |
//! | 400 | `{"error":"Invalid URL","details":…}` | not an absolute http(s) URL |
//! | 500 | `{"error":"Failed to generate audit","details":…}` | any pipeline failure |
//!
//! [`handle_generate_audit`] and [`route`] are transport-free so they can be
//! tested without a socket; [`AuditServer`] wires them to `tiny_http`.
//! tiny_http is blocking, so accepting, reading and responding happen on
//! the blocking pool while each audit runs as its own tokio task. The
//! accept wait is bounded by [`ACCEPT_POLL_INTERVAL`], so a dropped or
//! shut-down server never leaves a blocking thread parked in `recv`.

use crate::audit::run_audit;
use crate::config::AuditConfig;
use crate::error::{AuditError, ErrorBody};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// The one route the server answers.
pub const GENERATE_AUDIT_PATH: &str = "/api/generate-audit";

/// MIME type of a WordprocessingML document.
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Attachment name used when no usable report name is given.
pub const DEFAULT_FILENAME: &str = "audit-report.docx";

/// Request bodies larger than this are rejected unread.
pub const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Longest a single accept wait blocks before the loop re-checks shutdown.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\s\-_]").unwrap());

/// Body of `POST /api/generate-audit`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub url: Option<String>,
    pub report_name: Option<String>,
}

/// A response, independent of the HTTP library that sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: &'static str,
    /// Extra headers besides `Content-Type`.
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    fn json(status: u16, body: &ErrorBody) -> Self {
        Self {
            status,
            content_type: "application/json",
            headers: Vec::new(),
            body: serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec()),
        }
    }

    fn document(bytes: Vec<u8>, filename: &str) -> Self {
        Self {
            status: 200,
            content_type: DOCX_MIME,
            headers: vec![(
                "Content-Disposition",
                format!("attachment; filename=\"{filename}\""),
            )],
            body: bytes,
        }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Look up an extra header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Turn an optional report name into a safe attachment file name.
///
/// Everything outside ASCII letters, digits, whitespace, `-` and `_` is
/// removed; tabs and newlines become plain spaces so the name cannot break
/// out of the `Content-Disposition` header. A name that is blank after
/// stripping falls back to [`DEFAULT_FILENAME`].
///
/// ```rust
/// use webpage_audit::server::attachment_filename;
///
/// assert_eq!(attachment_filename(Some("My Report! #1")), "My Report 1.docx");
/// assert_eq!(attachment_filename(Some("!!!")), "audit-report.docx");
/// assert_eq!(attachment_filename(None), "audit-report.docx");
/// ```
pub fn attachment_filename(report_name: Option<&str>) -> String {
    let Some(name) = report_name else {
        return DEFAULT_FILENAME.to_string();
    };
    let stripped = UNSAFE_FILENAME_CHARS.replace_all(name, "");
    let flattened: String = stripped
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    let safe = flattened.trim();
    if safe.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        format!("{safe}.docx")
    }
}

/// Handle one `POST /api/generate-audit` body.
pub async fn handle_generate_audit(body: &[u8], config: &AuditConfig) -> HttpReply {
    let request: AuditRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            debug!("Rejected request body: {}", e);
            return HttpReply::json(
                400,
                &ErrorBody::new("Invalid request body").with_details(e.to_string()),
            );
        }
    };

    let url = match request.url.as_deref().map(str::trim) {
        Some(u) if !u.is_empty() => u,
        _ => return HttpReply::json(400, &ErrorBody::new("URL is required")),
    };
    let filename = attachment_filename(request.report_name.as_deref());

    match run_audit(url, config).await {
        Ok(output) => {
            info!(
                "Serving {} ({} bytes) for {}",
                filename, output.stats.document_bytes, url
            );
            HttpReply::document(output.document, &filename)
        }
        Err(e) => {
            log_failure(url, &e);
            HttpReply::json(e.status_code(), &e.to_body())
        }
    }
}

/// Dispatch a request by method and path.
pub async fn route(method: &str, path: &str, body: &[u8], config: &AuditConfig) -> HttpReply {
    let path = path.split('?').next().unwrap_or(path);
    if path != GENERATE_AUDIT_PATH {
        return HttpReply::json(404, &ErrorBody::new("Not found"));
    }
    if !method.eq_ignore_ascii_case("POST") {
        return HttpReply::json(
            405,
            &ErrorBody::new("Method not allowed").with_details(format!("{method} is not supported; use POST")),
        )
        .with_header("Allow", "POST");
    }
    handle_generate_audit(body, config).await
}

fn log_failure(url: &str, e: &AuditError) {
    if e.status_code() >= 500 {
        error!("Error generating audit for {}: {}", url, e);
    } else {
        warn!("Rejected audit request for {}: {}", url, e);
    }
}

// ── Server ───────────────────────────────────────────────────────────────

/// A bound HTTP server sharing one immutable config across requests.
pub struct AuditServer {
    server: Arc<tiny_http::Server>,
    config: Arc<AuditConfig>,
    shutdown: Arc<AtomicBool>,
}

/// Stops a running [`AuditServer`] from another task or thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    server: Arc<tiny_http::Server>,
    shutdown: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Ask the accept loop to return. Requests already accepted still finish.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.server.unblock();
    }
}

impl AuditServer {
    /// Bind to `addr` (e.g. `"127.0.0.1:3001"`; port 0 picks a free port).
    pub fn bind(addr: &str, config: AuditConfig) -> Result<Self, AuditError> {
        let server = tiny_http::Server::http(addr)
            .map_err(|e| AuditError::InvalidConfig(format!("Cannot listen on '{addr}': {e}")))?;
        Ok(Self {
            server: Arc::new(server),
            config: Arc::new(config),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The address actually bound, e.g. `127.0.0.1:3001`.
    pub fn local_addr(&self) -> String {
        self.server.server_addr().to_string()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server: Arc::clone(&self.server),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Serve until [`ShutdownHandle::shutdown`] is called or the listener fails.
    ///
    /// Dropping the returned future also stops the server; the blocking
    /// accept in flight at that moment returns within [`ACCEPT_POLL_INTERVAL`].
    pub async fn run(self) -> Result<(), AuditError> {
        info!("Listening on http://{}{}", self.local_addr(), GENERATE_AUDIT_PATH);
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Server on {} shutting down", self.local_addr());
                return Ok(());
            }

            let server = Arc::clone(&self.server);
            let accepted = tokio::task::spawn_blocking(move || server.recv_timeout(ACCEPT_POLL_INTERVAL))
                .await
                .map_err(|e| AuditError::Internal(format!("accept task failed: {e}")))?;
            let request = match accepted {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                // unblock() surfaces as an error from the pending accept
                Err(_) if self.shutdown.load(Ordering::SeqCst) => continue,
                Err(e) => return Err(AuditError::Internal(format!("accept failed: {e}"))),
            };

            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                if let Err(e) = serve(request, config).await {
                    warn!("Failed to answer request: {}", e);
                }
            });
        }
    }
}

async fn serve(mut request: tiny_http::Request, config: Arc<AuditConfig>) -> Result<(), AuditError> {
    let method = request.method().as_str().to_string();
    let path = request.url().to_string();
    debug!("{} {}", method, path);

    let too_large = request
        .body_length()
        .is_some_and(|len| len as u64 > MAX_BODY_BYTES);
    let (request, body) = if too_large {
        (request, None)
    } else {
        tokio::task::spawn_blocking(move || {
            let mut body = Vec::new();
            let read = request
                .as_reader()
                .take(MAX_BODY_BYTES + 1)
                .read_to_end(&mut body);
            (request, read.ok().map(|_| body))
        })
        .await
        .map_err(|e| AuditError::Internal(format!("read task failed: {e}")))?
    };

    let reply = match body {
        Some(body) if body.len() as u64 <= MAX_BODY_BYTES => {
            route(&method, &path, &body, &config).await
        }
        _ => HttpReply::json(
            400,
            &ErrorBody::new("Invalid request body")
                .with_details(format!("body exceeds {MAX_BODY_BYTES} bytes or could not be read")),
        ),
    };

    tokio::task::spawn_blocking(move || respond(request, reply))
        .await
        .map_err(|e| AuditError::Internal(format!("respond task failed: {e}")))?
        .map_err(|e| AuditError::Internal(format!("respond failed: {e}")))
}

fn respond(request: tiny_http::Request, reply: HttpReply) -> std::io::Result<()> {
    let mut response = tiny_http::Response::from_data(reply.body).with_status_code(reply.status);
    let headers = std::iter::once(("Content-Type", reply.content_type.to_string())).chain(reply.headers);
    for (name, value) in headers {
        match tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => response.add_header(header),
            Err(()) => warn!("Dropping invalid header {}: {:?}", name, value),
        }
    }
    request.respond(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::pipeline::capture::{Capture, ImageSource, RasterImage};
    use crate::pipeline::encode::encode_jpeg;
    use futures::future::BoxFuture;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::time::Duration;

    struct Solid;

    impl ImageSource for Solid {
        fn name(&self) -> &'static str {
            "solid"
        }

        fn capture<'a>(
            &'a self,
            _url: &'a str,
            _budget: Duration,
        ) -> BoxFuture<'a, Result<Capture, CaptureError>> {
            Box::pin(async {
                let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 90, Rgb([9, 9, 9])));
                Ok(Capture::FullPage(RasterImage::decode(encode_jpeg(&img, 80).unwrap())?))
            })
        }
    }

    fn config() -> AuditConfig {
        AuditConfig::builder().source(Arc::new(Solid)).build().unwrap()
    }

    fn json(reply: &HttpReply) -> serde_json::Value {
        serde_json::from_slice(&reply.body).unwrap()
    }

    #[test]
    fn sanitizer_strips_punctuation() {
        assert_eq!(attachment_filename(Some("My Report! #1")), "My Report 1.docx");
        assert_eq!(attachment_filename(Some("  q3_audit-final ")), "q3_audit-final.docx");
    }

    #[test]
    fn sanitizer_falls_back_when_blank() {
        assert_eq!(attachment_filename(None), DEFAULT_FILENAME);
        assert_eq!(attachment_filename(Some("")), DEFAULT_FILENAME);
        assert_eq!(attachment_filename(Some("   ")), DEFAULT_FILENAME);
        assert_eq!(attachment_filename(Some("?!/\\\"")), DEFAULT_FILENAME);
    }

    #[test]
    fn sanitizer_flattens_control_whitespace() {
        let name = attachment_filename(Some("a\r\nContent-Type: x"));
        assert!(!name.contains('\r') && !name.contains('\n'));
        assert_eq!(name, "a  Content-Type x.docx");
    }

    #[test]
    fn sanitizer_drops_quotes_and_path_separators() {
        assert_eq!(attachment_filename(Some("../../etc/\"x\"")), "etcx.docx");
    }

    #[tokio::test]
    async fn missing_url_is_400() {
        let reply = handle_generate_audit(br#"{"reportName":"x"}"#, &config()).await;
        assert_eq!(reply.status, 400);
        assert_eq!(json(&reply), serde_json::json!({"error": "URL is required"}));
    }

    #[tokio::test]
    async fn blank_url_is_400() {
        let reply = handle_generate_audit(br#"{"url":"   "}"#, &config()).await;
        assert_eq!(reply.status, 400);
        assert_eq!(json(&reply)["error"], "URL is required");
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let reply = handle_generate_audit(b"{not json", &config()).await;
        assert_eq!(reply.status, 400);
        assert_eq!(json(&reply)["error"], "Invalid request body");
    }

    #[tokio::test]
    async fn invalid_url_is_400() {
        let reply = handle_generate_audit(br#"{"url":"file:///etc/passwd"}"#, &config()).await;
        assert_eq!(reply.status, 400);
        assert_eq!(json(&reply)["error"], "Invalid URL");
    }

    #[tokio::test]
    async fn success_sets_attachment_headers() {
        let reply = handle_generate_audit(
            br#"{"url":"https://example.com","reportName":"Home page"}"#,
            &config(),
        )
        .await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.content_type, DOCX_MIME);
        assert_eq!(
            reply.header("content-disposition"),
            Some("attachment; filename=\"Home page.docx\"")
        );
        assert_eq!(&reply.body[..2], b"PK");
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let reply = route("POST", "/api/other", b"{}", &config()).await;
        assert_eq!(reply.status, 404);
    }

    #[tokio::test]
    async fn wrong_method_is_405_with_allow() {
        let reply = route("GET", GENERATE_AUDIT_PATH, b"", &config()).await;
        assert_eq!(reply.status, 405);
        assert_eq!(reply.header("Allow"), Some("POST"));
    }

    #[test]
    fn shutdown_handle_ends_run() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let server = AuditServer::bind("127.0.0.1:0", config()).unwrap();
        let handle = server.shutdown_handle();
        let running = runtime.spawn(server.run());

        handle.shutdown();
        let result = runtime.block_on(async {
            tokio::time::timeout(Duration::from_secs(5), running).await
        });
        assert!(matches!(result, Ok(Ok(Ok(())))), "run did not return: {result:?}");
    }

    #[test]
    fn dropping_runtime_with_aborted_server_does_not_hang() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let server = AuditServer::bind("127.0.0.1:0", config()).unwrap();
        let running = runtime.spawn(server.run());
        // let the accept loop park on the blocking pool
        std::thread::sleep(Duration::from_millis(50));
        running.abort();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(runtime);
            let _ = done_tx.send(());
        });
        assert!(
            done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
            "runtime shutdown stayed blocked on the accept loop"
        );
    }

    #[tokio::test]
    async fn query_string_is_ignored_for_routing() {
        let reply = route(
            "POST",
            "/api/generate-audit?src=ui",
            br#"{"url":"https://example.com"}"#,
            &config(),
        )
        .await;
        assert_eq!(reply.status, 200);
    }
}
