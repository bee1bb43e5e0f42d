//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, CORS)
//! - Hand inbound model requests to the relay with a per-request cancel signal
//! - Expose liveness and backend capacity
//! - Drain on shutdown, then close the pool

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::broker::{BackendSnapshot, Pool, PoolError};
use crate::config::RouterConfig;
use crate::http::request::{request_id, UuidRequestId, X_REQUEST_ID};
use crate::relay::{Relay, RelayError};

pub const CHAT_ENDPOINT: &str = "/api/chat";
pub const GENERATE_ENDPOINT: &str = "/api/generate";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    /// Parent of every request's cancel signal; cancelled at shutdown.
    pub requests: CancellationToken,
}

/// HTTP server for the router.
pub struct HttpServer {
    router: Router,
    config: RouterConfig,
    pool: Arc<Pool>,
    requests: CancellationToken,
}

impl HttpServer {
    /// Build the pool, relay and router. Fails if the backend list is unusable.
    pub fn new(config: RouterConfig) -> Result<Self, PoolError> {
        let pool = Arc::new(Pool::from_config(&config.ollama)?);
        let relay = Relay::new(pool.clone(), &config.upstream);
        let requests = CancellationToken::new();

        let state = AppState {
            relay,
            requests: requests.clone(),
        };

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            config,
            pool,
            requests,
        })
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(config: &RouterConfig, state: AppState) -> Router {
        let router = Router::new()
            .route(CHAT_ENDPOINT, post(chat_handler))
            .route(GENERATE_ENDPOINT, post(generate_handler))
            .route("/health", get(health_handler))
            .route("/router/backends", get(backends_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
                    .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        tracing::info_span!(
                            "request",
                            method = %request.method(),
                            path = %request.uri().path(),
                            request_id = request_id(request).unwrap_or("unknown")
                        )
                    }))
                    .layer(PropagateRequestIdLayer::new(X_REQUEST_ID)),
            );

        if config.cors.enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Run the server until `shutdown` fires, then drain and close the pool.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.pool.backends().len(),
            "HTTP server starting"
        );

        let requests = self.requests.clone();
        let signal = async move {
            shutdown.cancelled().await;
            tracing::info!("Shutdown signal received, cancelling in-flight requests");
            requests.cancel();
        };

        axum::serve(listener, self.router)
            .with_graceful_shutdown(signal)
            .await?;

        self.pool.close();
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

async fn chat_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    proxy(&state, request, CHAT_ENDPOINT).await
}

async fn generate_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    proxy(&state, request, GENERATE_ENDPOINT).await
}

async fn proxy(state: &AppState, request: Request<Body>, endpoint: &str) -> Response {
    let cancel = state.requests.child_token();
    match state.relay.forward(request, endpoint, cancel).await {
        Ok(response) => response,
        Err(err) => {
            if matches!(err, RelayError::Cancelled | RelayError::PoolClosed) {
                tracing::debug!(endpoint, error = %err, "Request aborted before relay");
            }
            err.into_response()
        }
    }
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn backends_handler(State(state): State<AppState>) -> Json<Vec<BackendSnapshot>> {
    Json(state.relay.pool().snapshot())
}
