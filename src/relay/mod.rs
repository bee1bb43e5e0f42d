//! Stream relay subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound POST /api/{chat,generate}
//!     → Pool::acquire (lease held from here on)
//!     → build POST to lease.url + endpoint, body streamed as-is
//!     → wait for upstream response headers only
//!     → mirror status + content-type
//!     → body.rs copies the body in 4 KiB frames, lease rides along
//!     → lease released when the body ends, fails or is dropped
//! ```
//!
//! # Design Decisions
//! - One attempt against one backend: no retries, no failover
//! - Connect/send failures become 503 with a fixed JSON body
//! - Failures after headers went out surface as an aborted stream

pub mod body;

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerError, Lease, Pool};
use crate::config::UpstreamConfig;
use crate::http::request::{request_id, X_REQUEST_ID};
use crate::http::response::{aborted, json_error};
use crate::observability::metrics;

pub use body::{relay_body, CHUNK_SIZE};

/// Body returned to the caller when the backend cannot be reached.
pub const CONNECT_ERROR_MESSAGE: &str = "Failed to connect to Ollama server";

fn json() -> HeaderValue {
    HeaderValue::from_static("application/json")
}

/// Why a request could not be relayed.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The caller's cancel signal fired before the backend answered.
    #[error("request cancelled")]
    Cancelled,

    /// The pool was closed while the request waited for a slot.
    #[error("backend pool is closed")]
    PoolClosed,

    /// Connecting to or sending to the leased backend failed.
    #[error("backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },
}

impl From<BrokerError> for RelayError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Cancelled => RelayError::Cancelled,
            BrokerError::Closed => RelayError::PoolClosed,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match self {
            RelayError::BackendUnavailable { .. } => {
                json_error(StatusCode::SERVICE_UNAVAILABLE, CONNECT_ERROR_MESSAGE)
            }
            RelayError::Cancelled | RelayError::PoolClosed => aborted(),
        }
    }
}

/// Forwards requests to leased backends.
#[derive(Clone)]
pub struct Relay {
    pool: Arc<Pool>,
    client: Client<HttpConnector, Body>,
    header_timeout: Duration,
}

impl Relay {
    pub fn new(pool: Arc<Pool>, config: &UpstreamConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            pool,
            client,
            header_timeout: Duration::from_secs(config.header_timeout_secs),
        }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Relay one request to `endpoint` on the least-loaded backend.
    ///
    /// The returned response streams the backend body; the lease lives in
    /// that body. On every early return the lease is dropped here.
    pub async fn forward(
        &self,
        request: Request<Body>,
        endpoint: &str,
        cancel: CancellationToken,
    ) -> Result<Response, RelayError> {
        let start = Instant::now();
        let lease = self.pool.acquire(&cancel).await?;

        let target = format!("{}{}", lease.url(), endpoint);
        let id = request_id(&request).map(str::to_owned);
        let upstream_request = build_upstream_request(&target, id.as_deref(), request.into_body())
            .map_err(|reason| RelayError::BackendUnavailable {
                backend: lease.url().to_string(),
                reason,
            })?;

        tracing::debug!(
            request_id = id.as_deref().unwrap_or("unknown"),
            target = %target,
            "Forwarding request"
        );

        let sent = tokio::time::timeout(self.header_timeout, self.client.request(upstream_request));
        let response = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            result = sent => match result {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::warn!(backend = %lease.url(), error = %e, "Failed to connect to backend");
                    return Err(self.unavailable(endpoint, lease.url(), e.to_string(), start));
                }
                Err(_) => {
                    tracing::warn!(
                        backend = %lease.url(),
                        timeout_secs = self.header_timeout.as_secs(),
                        "Backend did not answer before the header timeout"
                    );
                    return Err(self.unavailable(endpoint, lease.url(), "header timeout".to_string(), start));
                }
            },
        };

        metrics::record_request(endpoint, response.status().as_u16(), lease.url(), start);
        Ok(mirror_response(lease, response, cancel))
    }

    fn unavailable(&self, endpoint: &str, backend: &str, reason: String, start: Instant) -> RelayError {
        metrics::record_connect_failure(backend);
        metrics::record_request(endpoint, StatusCode::SERVICE_UNAVAILABLE.as_u16(), backend, start);
        RelayError::BackendUnavailable {
            backend: backend.to_string(),
            reason,
        }
    }
}

/// Caller-facing response: backend status and content type, body streamed
/// through [`relay_body`] which takes over the lease.
fn mirror_response(lease: Lease, upstream: hyper::Response<Incoming>, cancel: CancellationToken) -> Response {
    let (parts, incoming) = upstream.into_parts();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(json);

    tracing::debug!(backend = %lease.url(), status = %parts.status, "Streaming backend response");

    let mut response = Response::new(relay_body(lease, Body::new(incoming), cancel));
    *response.status_mut() = parts.status;
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    response
}

/// POST to `target` with the inbound body untouched and a JSON content type.
fn build_upstream_request(
    target: &str,
    request_id: Option<&str>,
    body: Body,
) -> Result<Request<Body>, String> {
    let uri: Uri = target.parse().map_err(|e| format!("invalid target {target:?}: {e}"))?;

    let mut request = Request::new(body);
    *request.method_mut() = Method::POST;
    *request.uri_mut() = uri;
    request.headers_mut().insert(header::CONTENT_TYPE, json());
    if let Some(id) = request_id.and_then(|v| HeaderValue::from_str(v).ok()) {
        request.headers_mut().insert(X_REQUEST_ID, id);
    }
    Ok(request)
}
