//! Request rewriter: the interception half of the add-on.
//!
//! Every outbound request the host proxy sees is handed to [`SpoofHandler`].
//! The handler freezes one settings snapshot, encodes it into the reserved
//! config header, and swaps the request's destination for the spoofing
//! engine's listener. Responses pass through untouched. Requests addressed to
//! the error sentinel host are engine diagnostics, not traffic; they are
//! logged and consumed.

use http_body_util::{BodyExt, Full};
use hudsucker::{
    hyper::{Request, Response},
    Body, HttpContext, HttpHandler, RequestOrResponse,
};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::Uri;
use once_cell::sync::Lazy;

use awesome_tls_core::{
    diagnostics, ConfigError, LifecycleController, LiveSettings, RedirectTarget, Settings,
    TransportConfig, CONFIG_HEADER_NAME,
};

static CONFIG_HEADER: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_bytes(CONFIG_HEADER_NAME.as_bytes()).unwrap());

fn bytes_to_body(bytes: Bytes) -> Body {
    Body::from(Full::new(bytes))
}

/// Rewrites one outbound request against a frozen settings snapshot.
///
/// Inserts exactly one config header and redirects the destination authority
/// to the spoof listener; method, path, version and body are untouched. Not
/// idempotent: the host must call this once per original request.
pub fn rewrite_request(
    req: Request<Body>,
    settings: &Settings,
) -> Result<Request<Body>, ConfigError> {
    let host = request_host(&req)
        .ok_or_else(|| ConfigError::MalformedRequest("request has no destination host".into()))?;
    let scheme = req.uri().scheme_str().unwrap_or("https").to_string();

    let target = RedirectTarget::parse(&settings.spoof_proxy_addr)?;
    let config = TransportConfig::from_settings(settings, &host, &scheme);
    let encoded = config.encode();
    tracing::debug!("using config: {encoded}");

    let header_value = HeaderValue::from_str(&encoded)
        .map_err(|e| ConfigError::HeaderValue(e.to_string()))?;

    let (mut parts, body) = req.into_parts();

    // The engine always terminates TLS itself; the original scheme travels
    // inside the config header.
    let mut uri = Uri::builder()
        .scheme("https")
        .authority(target.authority());
    uri = match parts.uri.path_and_query() {
        Some(path_and_query) => uri.path_and_query(path_and_query.clone()),
        None => uri.path_and_query("/"),
    };
    parts.uri = uri
        .build()
        .map_err(|e| ConfigError::MalformedRequest(e.to_string()))?;

    // insert, not append: rewriting must add exactly one occurrence.
    parts.headers.insert(CONFIG_HEADER.clone(), header_value);

    Ok(Request::from_parts(parts, body))
}

/// Extracts the destination host from the URI, falling back to the Host
/// header.
fn request_host(req: &Request<Body>) -> Option<String> {
    if let Some(host) = req.uri().host() {
        return Some(host.to_string());
    }

    req.headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(':').next().unwrap_or(s).to_string())
}

/// HTTP handler plugging the rewriter into the host proxy.
#[derive(Clone, Debug)]
pub struct SpoofHandler {
    settings: LiveSettings,
    lifecycle: LifecycleController,
}

impl SpoofHandler {
    /// Creates a handler reading the given live settings and reporting fatal
    /// conditions to the given lifecycle controller.
    pub fn new(settings: LiveSettings, lifecycle: LifecycleController) -> Self {
        Self {
            settings,
            lifecycle,
        }
    }

    /// Consumes a sentinel-marked message: its body is an engine diagnostic
    /// about one connection and must never reach a real upstream.
    async fn consume_engine_report(&self, host: &str, req: Request<Body>) -> RequestOrResponse {
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!("failed to read engine report body: {e}");
                Bytes::new()
            }
        };

        if let Some(payload) = diagnostics::inspect_message(host, &body) {
            diagnostics::report(&payload);
        }

        RequestOrResponse::Response(
            Response::builder()
                .status(200)
                .body(Body::empty())
                .unwrap(),
        )
    }

    /// Handles one request-direction message.
    ///
    /// Split out from the [`HttpHandler`] impl so it can be exercised without
    /// a live proxy context.
    async fn process_request(&mut self, req: Request<Body>) -> RequestOrResponse {
        let host = request_host(&req);
        if let Some(host) = host.filter(|h| diagnostics::is_error_report(h)) {
            return self.consume_engine_report(&host, req).await;
        }

        let snapshot = self.settings.snapshot();
        match rewrite_request(req, &snapshot) {
            Ok(req) => RequestOrResponse::Request(req),
            Err(e) => self.rewrite_failed(&e),
        }
    }

    /// Handles one response-direction message: a pass-through.
    fn process_response(&mut self, res: Response<Body>) -> Response<Body> {
        res
    }

    fn rewrite_failed(&self, error: &ConfigError) -> RequestOrResponse {
        // Passing unspoofed traffic would give a false sense of protection;
        // answer the request with an error and take the extension down.
        self.lifecycle
            .fail(&format!("failed to rewrite request: {error}"));

        RequestOrResponse::Response(
            Response::builder()
                .status(502)
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(bytes_to_body(Bytes::from(format!(
                    "awesome-tls rewrite failed: {error}"
                ))))
                .unwrap(),
        )
    }
}

impl HttpHandler for SpoofHandler {
    async fn handle_request(
        &mut self,
        _ctx: &HttpContext,
        req: Request<Body>,
    ) -> RequestOrResponse {
        self.process_request(req).await
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        // Only request-direction traffic carries a destination to rewrite.
        self.process_response(res)
    }
}
