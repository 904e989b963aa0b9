//! HTTP server setup and request forwarding.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all proxy handler
//! - Wire up middleware (request ID, tracing)
//! - Run matching requests through the body rewriter
//! - Forward everything to the upstream and stream the response back
//! - Map upstream failures to 502/504

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{request::Parts, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::body::Incoming;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::error::RewriteError;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::upstream::{build_client, strip_hop_by_hop, Upstream, UpstreamClient, UpstreamError};
use crate::observability::metrics;
use crate::pool::Pools;
use crate::rewrite::Rewriter;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub rewriter: Rewriter,
    pub upstream: Arc<Upstream>,
    pub client: UpstreamClient,
    pub response_header_timeout: Duration,
}

/// Why a request could not be forwarded.
#[derive(Debug, thiserror::Error)]
enum ForwardError {
    #[error(transparent)]
    Prepare(#[from] UpstreamError),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("no upstream response headers within {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    fn status(&self) -> StatusCode {
        match self {
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &ProxyConfig) -> Result<Self, UpstreamError> {
        let pools = Pools::new(&config.pool);
        let rewriter = Rewriter::new(pools, config.rewrite.clone());
        let upstream = Arc::new(Upstream::from_url(&config.upstream.url)?);
        let client = build_client(&config.upstream)?;

        let state = AppState {
            rewriter,
            upstream,
            client,
            response_header_timeout: Duration::from_secs(config.upstream.response_header_timeout_secs),
        };

        let router = Self::build_router(state.clone());
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "http",
                    request_id = request_id(request.headers()),
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }))
            .layer(set_request_id_layer())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.state.upstream.authority(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Rewrite the body when the route matches, then forward.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let (mut parts, body) = request.into_parts();
    let method = parts.method.clone();

    let body = if state.rewriter.matches(&parts.method, parts.uri.path()) {
        match state.rewriter.rewrite_request(&mut parts, body, Some(peer)).await {
            Ok(body) => body,
            Err(error) => {
                let status = match error {
                    RewriteError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                tracing::warn!(error = %error, status = status.as_u16(), "Rejecting request body");
                metrics::record_request(method.as_str(), status.as_u16(), start);
                return (status, error.to_string()).into_response();
            }
        }
    } else {
        body
    };

    match forward(&state, parts, body, peer).await {
        Ok(response) => {
            let status = response.status();
            metrics::record_request(method.as_str(), status.as_u16(), start);

            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(error) => {
            let status = error.status();
            match &error {
                ForwardError::Upstream(e) if e.is_connect() => {
                    tracing::error!(error = %error, "Upstream connect failed");
                }
                _ => tracing::error!(error = %error, "Upstream error"),
            }
            metrics::record_request(method.as_str(), status.as_u16(), start);
            (status, status.canonical_reason().unwrap_or("Upstream error")).into_response()
        }
    }
}

async fn forward(
    state: &AppState,
    mut parts: Parts,
    body: Body,
    peer: SocketAddr,
) -> Result<Response<Incoming>, ForwardError> {
    state.upstream.prepare(&mut parts, Some(peer))?;
    let request = Request::from_parts(parts, body);

    tokio::time::timeout(state.response_header_timeout, state.client.request(request))
        .await
        .map_err(|_| ForwardError::Timeout(state.response_header_timeout))?
        .map_err(ForwardError::from)
}
