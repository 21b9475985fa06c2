//! HTTP middleware for the features service.
//!
//! - [`RequestId`]: correlation id, taken from `X-Request-ID` or generated
//!   as a UUID v7, available to handlers as an extractor and echoed back in
//!   the response
//! - [`MetricsLayer`]: request span, request logging and HTTP metrics
//! - [`cache_control`]: default `Cache-Control` on successful GET responses
//! - [`refresh_stale_catalog`]: catalog refresh once the TTL expired
//!
//! Metric labels use [`route_label`], which replaces collection and feature
//! ids with placeholders so label cardinality does not grow with the data.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::{ConnectInfo, FromRequestParts, Request as AxumRequest, State};
use axum::http::{header, request::Parts, HeaderMap, HeaderValue, Method, Request, Response};
use axum::middleware::Next;
use axum::response::Response as AxumResponse;
use pin_project_lite::pin_project;
use tower::{Layer, Service};
use tracing::{info_span, Span};
use uuid::Uuid;

use crate::state::{AppState, RefreshMode};

/// Header carrying the correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Newtype wrapper for request correlation IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// Create a new request ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new UUID v7 request ID.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the request ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Uses the id set by [`MetricsLayer`], falling back to the header or a new id
/// when the layer is not installed.
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| extract_or_generate_request_id(&parts.headers)))
    }
}

/// The `X-Request-ID` header when present and non-empty, otherwise a new UUID v7.
pub fn extract_or_generate_request_id(headers: &HeaderMap) -> RequestId {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(RequestId::from)
        .unwrap_or_else(RequestId::generate)
}

/// Metric label for a request path.
///
/// Drops the query string and replaces the segment after `collections` with
/// `{collectionId}` and the segment after `items` with `{featureId}`.
pub fn route_label(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    let mut previous = "";
    let segments: Vec<&str> = path
        .split('/')
        .map(|segment| {
            let label = match previous {
                "collections" if !segment.is_empty() => "{collectionId}",
                "items" if !segment.is_empty() => "{featureId}",
                _ => segment,
            };
            previous = segment;
            label
        })
        .collect();
    segments.join("/")
}

/// Convert HTTP status code to bucket label.
///
/// Groups status codes into buckets: "2xx", "3xx", "4xx", "5xx".
fn status_bucket(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

// =============================================================================
// MetricsLayer - Tower middleware for HTTP metrics
// =============================================================================

/// Tower layer for recording HTTP metrics.
///
/// Wraps services to record:
/// - `http_requests_total`: Counter by method, path, status bucket
/// - `http_request_duration_seconds`: Histogram by method, path
/// - `http_request_size_bytes`: Histogram by method, path
/// - `http_response_size_bytes`: Histogram by method, path
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsMiddleware { inner }
    }
}

/// Middleware service that records HTTP metrics.
#[derive(Debug, Clone)]
pub struct MetricsMiddleware<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: http_body::Body + Send + 'static,
    ResBody: http_body::Body + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = MetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();

        let method = req.method().to_string();
        let path = route_label(req.uri().path());

        // Record request size
        if let Some(content_length) = req.headers().get(http::header::CONTENT_LENGTH) {
            if let Ok(size) = content_length.to_str().unwrap_or("0").parse::<f64>() {
                metrics::histogram!(
                    "http_request_size_bytes",
                    "method" => method.clone(),
                    "path" => path.clone()
                )
                .record(size);
            }
        }

        let request_id = extract_or_generate_request_id(req.headers());
        req.extensions_mut().insert(request_id.clone());
        let remote_addr = req
            .extensions()
            .get::<ConnectInfo<std::net::SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string());

        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %method,
            path = %path,
            remote_addr = remote_addr.as_deref().unwrap_or("-"),
        );

        span.in_scope(|| tracing::debug!("handling request"));

        let future = self.inner.call(req);

        MetricsFuture {
            inner: future,
            start,
            method,
            path,
            request_id,
            span,
        }
    }
}

pin_project! {
    /// Future wrapper that records metrics on completion.
    pub struct MetricsFuture<F> {
        #[pin]
        inner: F,
        start: Instant,
        method: String,
        path: String,
        request_id: RequestId,
        span: Span,
    }
}

impl<F, ResBody, E> Future for MetricsFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    ResBody: http_body::Body,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _enter = this.span.enter();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(mut result) => {
                let duration = this.start.elapsed();
                let duration_secs = duration.as_secs_f64();
                let latency_ms = duration.as_secs_f64() * 1000.0;

                match &mut result {
                    Ok(response) => {
                        if let Ok(value) = HeaderValue::from_str(this.request_id.as_str()) {
                            response.headers_mut().insert(REQUEST_ID_HEADER, value);
                        }
                        let status = response.status().as_u16();
                        let status_label = status_bucket(status);

                        metrics::counter!(
                            "http_requests_total",
                            "method" => this.method.clone(),
                            "path" => this.path.clone(),
                            "status" => status_label
                        )
                        .increment(1);

                        metrics::histogram!(
                            "http_request_duration_seconds",
                            "method" => this.method.clone(),
                            "path" => this.path.clone()
                        )
                        .record(duration_secs);

                        if let Some(content_length) = response.headers().get(http::header::CONTENT_LENGTH) {
                            if let Ok(size) = content_length.to_str().unwrap_or("0").parse::<f64>() {
                                metrics::histogram!(
                                    "http_response_size_bytes",
                                    "method" => this.method.clone(),
                                    "path" => this.path.clone()
                                )
                                .record(size);
                            }
                        }

                        tracing::info!(
                            status = status,
                            latency_ms = latency_ms,
                            "request completed"
                        );
                    }
                    Err(_) => {
                        metrics::counter!(
                            "http_requests_total",
                            "method" => this.method.clone(),
                            "path" => this.path.clone(),
                            "status" => "5xx"
                        )
                        .increment(1);

                        metrics::histogram!(
                            "http_request_duration_seconds",
                            "method" => this.method.clone(),
                            "path" => this.path.clone()
                        )
                        .record(duration_secs);

                        tracing::error!(
                            latency_ms = latency_ms,
                            "request failed"
                        );
                    }
                }

                Poll::Ready(result)
            }
        }
    }
}

// =============================================================================
// Response and catalog middleware
// =============================================================================

/// Set `Cache-Control` on successful GET responses that have none.
///
/// Used with [`axum::middleware::from_fn_with_state`]; the state is the
/// configured header value.
pub async fn cache_control(
    State(value): State<HeaderValue>,
    request: AxumRequest,
    next: Next,
) -> AxumResponse {
    let is_get = request.method() == Method::GET;
    let mut response = next.run(request).await;
    if is_get
        && response.status().is_success()
        && !response.headers().contains_key(header::CACHE_CONTROL)
    {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    response
}

/// Refresh the catalog once it is stale.
///
/// The request is always served from the current catalog. With
/// [`RefreshMode::Background`] the refresh runs on a spawned task; with
/// [`RefreshMode::Inline`] it is awaited before the response is returned.
pub async fn refresh_stale_catalog(
    State(state): State<AppState>,
    request: AxumRequest,
    next: Next,
) -> AxumResponse {
    if !state.catalog_is_stale().await {
        return next.run(request).await;
    }
    match state.refresh_mode() {
        RefreshMode::Background => {
            let background = state.clone();
            tokio::spawn(async move {
                if let Err(e) = background.refresh_if_stale().await {
                    tracing::warn!(error = %e, "background catalog refresh failed");
                }
            });
            next.run(request).await
        }
        RefreshMode::Inline => {
            let response = next.run(request).await;
            if let Err(e) = state.refresh_if_stale().await {
                tracing::warn!(error = %e, "catalog refresh failed");
            }
            response
        }
    }
}
